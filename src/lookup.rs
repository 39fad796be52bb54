//! Hostname indexers, address extractors and the per-kind lookups that bind
//! them together.
//!
//! Indexers map one cluster object to the hostname keys it is filed under.
//! Extractors map one cluster object to the addresses it currently exposes,
//! resolving hostname-typed load-balancer entries through the operating
//! system resolver. A [`Lookup`] implementation per resource kind ties an
//! index to its extractor; the query engine only ever sees the `Lookup`
//! trait.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info};

use crate::crd::{DNSEndpoint, GRPCRoute, Gateway, HTTPRoute, ParentReference, TLSRoute};
use crate::hostname::is_valid_domain;
use crate::index::ResourceIndex;
use crate::registry::{AddressBundle, Lookup};

/// Annotation overriding the hostname a Service is published under.
pub const HOSTNAME_ANNOTATION: &str = "coredns.io/hostname";

/// external-dns hostname annotation, honored when the primary annotation is
/// absent. Comma-separated.
pub const EXTERNAL_DNS_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";

const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";
const GATEWAY_ADDRESS_TYPE_HOSTNAME: &str = "Hostname";

/// Resolves a hostname to IP addresses.
///
/// Load-balancer status entries may carry a hostname instead of an IP (CNAME
/// style); those are resolved at query time. Injected as a trait so tests
/// run without network access.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolves `host` to all its addresses.
    async fn lookup_ips(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// [`HostResolver`] backed by the operating system resolver (getaddrinfo).
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup_ips(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        Ok(tokio::net::lookup_host((host, 0u16))
            .await?
            .map(|addr| addr.ip())
            .collect())
    }
}

// --- Indexers ---

/// Hostname keys of an Ingress: every `spec.rules[].host`.
pub fn ingress_hostnames(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .map(|rules| rules.iter().filter_map(|rule| rule.host.clone()).collect())
        .unwrap_or_default()
}

/// Hostname keys of a Service. Only LoadBalancer services are indexed:
/// the `coredns.io/hostname` annotation wins when valid, then the
/// external-dns annotation entries, then the `<name>.<namespace>` fallback.
pub fn service_hostnames(service: &Service) -> Vec<String> {
    if !is_load_balancer(service) {
        return Vec::new();
    }

    let annotations = service.annotations();
    if let Some(value) = annotations.get(HOSTNAME_ANNOTATION) {
        let value = value.to_ascii_lowercase();
        if is_valid_domain(&value) {
            return vec![value];
        }
        info!(hostname = %value, "RFC 1123 conformance failed for hostname annotation");
        return Vec::new();
    }

    if let Some(value) = annotations.get(EXTERNAL_DNS_ANNOTATION) {
        let value = value.to_ascii_lowercase();
        return split_hostname_annotation(&value)
            .into_iter()
            .filter(|hostname| {
                if is_valid_domain(hostname) {
                    true
                } else {
                    info!(hostname = %hostname, "RFC 1123 conformance failed for hostname annotation");
                    false
                }
            })
            .collect();
    }

    vec![format!(
        "{}.{}",
        service.name_any(),
        service.namespace().unwrap_or_default()
    )]
}

fn split_hostname_annotation(value: &str) -> Vec<String> {
    value
        .replace(' ', "")
        .split(',')
        .map(str::to_string)
        .collect()
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some(SERVICE_TYPE_LOAD_BALANCER)
}

/// Index key of a Gateway: `<namespace>/<name>`, the key routes resolve
/// their parents by.
pub fn gateway_key(gateway: &Gateway) -> Vec<String> {
    vec![format!(
        "{}/{}",
        gateway.namespace().unwrap_or_default(),
        gateway.name_any()
    )]
}

/// Hostname keys of a DNSEndpoint: every endpoint `dnsName`.
pub fn dns_endpoint_hostnames(endpoint: &DNSEndpoint) -> Vec<String> {
    endpoint
        .spec
        .endpoints
        .iter()
        .map(|ep| ep.dns_name.clone())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Common shape of the Gateway API route kinds.
pub trait GatewayRoute: Resource<DynamicType = ()> + Send + Sync {
    /// Hostnames the route matches.
    fn hostnames(&self) -> Vec<String>;
    /// Parent Gateway references.
    fn parent_refs(&self) -> Vec<ParentReference>;
}

impl GatewayRoute for HTTPRoute {
    fn hostnames(&self) -> Vec<String> {
        self.spec.hostnames.clone()
    }

    fn parent_refs(&self) -> Vec<ParentReference> {
        self.spec.parent_refs.clone()
    }
}

impl GatewayRoute for TLSRoute {
    fn hostnames(&self) -> Vec<String> {
        self.spec.hostnames.clone()
    }

    fn parent_refs(&self) -> Vec<ParentReference> {
        self.spec.parent_refs.clone()
    }
}

impl GatewayRoute for GRPCRoute {
    fn hostnames(&self) -> Vec<String> {
        self.spec.hostnames.clone()
    }

    fn parent_refs(&self) -> Vec<ParentReference> {
        self.spec.parent_refs.clone()
    }
}

// --- Extractors ---

async fn resolve_into(bundle: &mut AddressBundle, resolver: &dyn HostResolver, host: &str) {
    match resolver.lookup_ips(host).await {
        Ok(ips) => {
            for ip in ips {
                bundle.push_ip(ip);
            }
        }
        Err(err) => debug!(host, %err, "load balancer hostname did not resolve"),
    }
}

fn push_parsed(bundle: &mut AddressBundle, raw: &str) {
    match raw.parse::<IpAddr>() {
        Ok(ip) => bundle.push_ip(ip),
        Err(_) => debug!(address = raw, "skipping unparseable address"),
    }
}

/// Addresses of one Service. Non-empty `spec.externalIPs` short-circuits the
/// status field entirely; otherwise every load-balancer ingress entry
/// contributes, hostname entries through the resolver.
pub async fn service_addresses(service: &Service, resolver: &dyn HostResolver) -> AddressBundle {
    let mut bundle = AddressBundle::default();

    let external_ips = service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_ips.as_ref())
        .filter(|ips| !ips.is_empty());
    if let Some(external_ips) = external_ips {
        for raw in external_ips {
            push_parsed(&mut bundle, raw);
        }
        return bundle;
    }

    let entries = service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref());
    if let Some(entries) = entries {
        for entry in entries {
            if let Some(host) = entry.hostname.as_deref().filter(|h| !h.is_empty()) {
                resolve_into(&mut bundle, resolver, host).await;
            } else if let Some(ip) = entry.ip.as_deref().filter(|ip| !ip.is_empty()) {
                push_parsed(&mut bundle, ip);
            }
        }
    }

    bundle
}

/// Addresses of one Ingress, from its load-balancer status.
pub async fn ingress_addresses(ingress: &Ingress, resolver: &dyn HostResolver) -> AddressBundle {
    let mut bundle = AddressBundle::default();

    let entries = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref());
    if let Some(entries) = entries {
        for entry in entries {
            if let Some(host) = entry.hostname.as_deref().filter(|h| !h.is_empty()) {
                resolve_into(&mut bundle, resolver, host).await;
            } else if let Some(ip) = entry.ip.as_deref().filter(|ip| !ip.is_empty()) {
                push_parsed(&mut bundle, ip);
            }
        }
    }

    bundle
}

/// Addresses of one Gateway, from its status addresses. The address type
/// defaults to `IPAddress` when unset.
pub async fn gateway_addresses(gateway: &Gateway, resolver: &dyn HostResolver) -> AddressBundle {
    let mut bundle = AddressBundle::default();

    if let Some(status) = &gateway.status {
        for address in &status.addresses {
            if address.address_type.as_deref() == Some(GATEWAY_ADDRESS_TYPE_HOSTNAME) {
                resolve_into(&mut bundle, resolver, &address.value).await;
            } else {
                push_parsed(&mut bundle, &address.value);
            }
        }
    }

    bundle
}

// --- Per-kind lookups ---

/// Lookup over the Service index.
pub struct ServiceLookup {
    index: ResourceIndex<Service>,
    resolver: Arc<dyn HostResolver>,
}

impl ServiceLookup {
    /// Binds the Service index to its extractor.
    pub fn new(index: ResourceIndex<Service>, resolver: Arc<dyn HostResolver>) -> Self {
        Self { index, resolver }
    }
}

#[async_trait]
impl Lookup for ServiceLookup {
    async fn lookup(&self, keys: &[String]) -> AddressBundle {
        let objects = self.index.get_all(keys);
        debug!(count = objects.len(), "found matching Service objects");

        let mut bundle = AddressBundle::default();
        for service in objects {
            bundle.merge(service_addresses(&service, self.resolver.as_ref()).await);
        }
        bundle
    }
}

/// Lookup over the Ingress index, honoring an optional ingress-class filter.
pub struct IngressLookup {
    index: ResourceIndex<Ingress>,
    classes: Vec<String>,
    resolver: Arc<dyn HostResolver>,
}

impl IngressLookup {
    /// Binds the Ingress index to its extractor. A non-empty `classes` list
    /// restricts answers to ingresses of those classes.
    pub fn new(
        index: ResourceIndex<Ingress>,
        classes: Vec<String>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            index,
            classes,
            resolver,
        }
    }

    fn class_selected(&self, ingress: &Ingress) -> bool {
        if self.classes.is_empty() {
            return true;
        }
        // An ingress without a class never matches an active filter.
        match ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.as_deref())
        {
            Some(class) => self.classes.iter().any(|c| c == class),
            None => false,
        }
    }
}

#[async_trait]
impl Lookup for IngressLookup {
    async fn lookup(&self, keys: &[String]) -> AddressBundle {
        let objects = self.index.get_all(keys);
        debug!(count = objects.len(), "found matching Ingress objects");

        let mut bundle = AddressBundle::default();
        for ingress in objects {
            if !self.class_selected(&ingress) {
                debug!(
                    class = ingress
                        .spec
                        .as_ref()
                        .and_then(|s| s.ingress_class_name.as_deref())
                        .unwrap_or("<none>"),
                    "skipping ingress outside the configured classes"
                );
                continue;
            }
            bundle.merge(ingress_addresses(&ingress, self.resolver.as_ref()).await);
        }
        bundle
    }
}

/// Lookup over a route index; addresses come from the parent Gateways.
pub struct RouteLookup<R> {
    index: ResourceIndex<R>,
    gateways: ResourceIndex<Gateway>,
    classes: Vec<String>,
    resolver: Arc<dyn HostResolver>,
}

impl<R: GatewayRoute> RouteLookup<R> {
    /// Binds a route index to the shared Gateway index. A non-empty
    /// `classes` list restricts answers to Gateways of those classes.
    pub fn new(
        index: ResourceIndex<R>,
        gateways: ResourceIndex<Gateway>,
        classes: Vec<String>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            index,
            gateways,
            classes,
            resolver,
        }
    }
}

#[async_trait]
impl<R: GatewayRoute + 'static> Lookup for RouteLookup<R> {
    async fn lookup(&self, keys: &[String]) -> AddressBundle {
        let routes = self.index.get_all(keys);
        debug!(count = routes.len(), "found matching route objects");

        let mut bundle = AddressBundle::default();
        for route in routes {
            let route_namespace = route.namespace().unwrap_or_default();
            for parent in route.parent_refs() {
                let namespace = parent
                    .namespace
                    .clone()
                    .unwrap_or_else(|| route_namespace.clone());
                let gateway_key = format!("{}/{}", namespace, parent.name);

                for gateway in self.gateways.get(&gateway_key) {
                    if !self.classes.is_empty()
                        && !self
                            .classes
                            .iter()
                            .any(|c| *c == gateway.spec.gateway_class_name)
                    {
                        debug!(
                            class = %gateway.spec.gateway_class_name,
                            "skipping gateway outside the configured classes"
                        );
                        continue;
                    }
                    bundle.merge(gateway_addresses(&gateway, self.resolver.as_ref()).await);
                }
            }
        }
        bundle
    }
}

/// Lookup over the DNSEndpoint index.
pub struct DnsEndpointLookup {
    index: ResourceIndex<DNSEndpoint>,
}

impl DnsEndpointLookup {
    /// Binds the DNSEndpoint index.
    pub fn new(index: ResourceIndex<DNSEndpoint>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Lookup for DnsEndpointLookup {
    async fn lookup(&self, keys: &[String]) -> AddressBundle {
        let mut bundle = AddressBundle::default();
        for key in keys {
            let objects = self.index.get(key);
            debug!(key = %key, count = objects.len(), "found matching DNSEndpoint objects");

            for object in objects {
                for endpoint in &object.spec.endpoints {
                    if !endpoint.dns_name.eq_ignore_ascii_case(key) {
                        continue;
                    }
                    for target in &endpoint.targets {
                        match endpoint.record_type.as_str() {
                            "A" => match target.parse::<Ipv4Addr>() {
                                Ok(ip) => bundle.a.push(ip),
                                Err(_) => debug!(target = %target, "skipping unparseable A target"),
                            },
                            "AAAA" => match target.parse::<Ipv6Addr>() {
                                Ok(ip) => bundle.aaaa.push(ip),
                                Err(_) => {
                                    debug!(target = %target, "skipping unparseable AAAA target")
                                }
                            },
                            "TXT" => bundle.txt.push(target.clone()),
                            // CNAME and friends are not served.
                            _ => {}
                        }
                    }
                }
            }
        }
        bundle
    }
}
