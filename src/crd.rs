//! Custom resource types the server watches but does not own.
//!
//! Gateway API routes and the external-dns `DNSEndpoint` are cluster CRDs, so
//! their types are declared here rather than coming from `k8s-openapi`. Only
//! the fields the resolution pipeline reads are declared; serde ignores the
//! rest of each object.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference from a route to the Gateway that carries its traffic.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    /// Name of the parent Gateway.
    #[serde(default)]
    pub name: String,

    /// Namespace of the parent; defaults to the route's own namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// `gateway.networking.k8s.io/v1` Gateway, reduced to its class name and
/// status addresses.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "Gateway",
    namespaced
)]
#[kube(status = "GatewayStatus")]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Name of the GatewayClass this Gateway belongs to.
    #[serde(default)]
    pub gateway_class_name: String,
}

/// Status subresource of a Gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// Addresses the Gateway is reachable at.
    #[serde(default)]
    pub addresses: Vec<GatewayAddress>,
}

/// One address in a Gateway's status.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct GatewayAddress {
    /// Address type; `IPAddress` (the API default) or `Hostname`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub address_type: Option<String>,

    /// The address value itself.
    #[serde(default)]
    pub value: String,
}

/// `gateway.networking.k8s.io/v1` HTTPRoute hostnames and parents.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "HTTPRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Hostnames the route matches.
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Gateways the route is attached to.
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
}

/// `gateway.networking.k8s.io/v1alpha2` TLSRoute hostnames and parents.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "TLSRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TlsRouteSpec {
    /// Hostnames the route matches (SNI).
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Gateways the route is attached to.
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
}

/// `gateway.networking.k8s.io/v1` GRPCRoute hostnames and parents.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "GRPCRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRouteSpec {
    /// Hostnames the route matches.
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Gateways the route is attached to.
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
}

/// `externaldns.k8s.io/v1alpha1` DNSEndpoint: explicit records declared by
/// external-dns sources.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "externaldns.k8s.io",
    version = "v1alpha1",
    kind = "DNSEndpoint",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DnsEndpointSpec {
    /// The declared endpoints.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// One record declaration inside a DNSEndpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Fully qualified name of the record.
    #[serde(default)]
    pub dns_name: String,

    /// Record type; `A`, `AAAA` and `TXT` are served, everything else is
    /// ignored.
    #[serde(default)]
    pub record_type: String,

    /// Record values.
    #[serde(default)]
    pub targets: Vec<String>,
}
