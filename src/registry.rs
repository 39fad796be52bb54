//! Resource registry: the ordered table of cluster resource kinds the server
//! answers from, each bound to a hostname lookup.
//!
//! Registry order is query-time precedence. The registry is assembled once at
//! startup and treated as immutable afterwards; kinds that are known but not
//! enabled keep a no-op lookup so the query engine can always iterate the
//! full table.

use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Addresses collected for one hostname, grouped by record type.
///
/// All three lists are always present; callers may rely on empty vectors
/// rather than absent keys. Duplicates are allowed here and de-duplicated
/// when the DNS answer is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBundle {
    /// IPv4 addresses answering A queries.
    pub a: Vec<Ipv4Addr>,
    /// IPv6 addresses answering AAAA queries.
    pub aaaa: Vec<Ipv6Addr>,
    /// Raw TXT values; chunked to 255-byte strings at response time.
    pub txt: Vec<String>,
}

impl AddressBundle {
    /// True when no record type holds any value.
    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.aaaa.is_empty() && self.txt.is_empty()
    }

    /// Appends all addresses from `other`, preserving order.
    pub fn merge(&mut self, other: AddressBundle) {
        self.a.extend(other.a);
        self.aaaa.extend(other.aaaa);
        self.txt.extend(other.txt);
    }

    /// Files an address under A or AAAA according to its family.
    pub fn push_ip(&mut self, ip: IpAddr) {
        match ip {
            IpAddr::V4(v4) => self.a.push(v4),
            IpAddr::V6(v6) => self.aaaa.push(v6),
        }
    }
}

/// The cluster resource kinds the server knows how to answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `networking.k8s.io/v1` Ingress.
    Ingress,
    /// `core/v1` Service of type LoadBalancer.
    Service,
    /// `gateway.networking.k8s.io/v1` HTTPRoute.
    HttpRoute,
    /// `gateway.networking.k8s.io/v1alpha2` TLSRoute.
    TlsRoute,
    /// `gateway.networking.k8s.io/v1` GRPCRoute.
    GrpcRoute,
    /// `externaldns.k8s.io/v1alpha1` DNSEndpoint.
    DnsEndpoint,
}

impl ResourceKind {
    /// The full catalog, in default registration order.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Ingress,
        ResourceKind::Service,
        ResourceKind::HttpRoute,
        ResourceKind::TlsRoute,
        ResourceKind::GrpcRoute,
        ResourceKind::DnsEndpoint,
    ];

    /// Kinds served through the Gateway API.
    pub const ROUTES: [ResourceKind; 3] = [
        ResourceKind::HttpRoute,
        ResourceKind::TlsRoute,
        ResourceKind::GrpcRoute,
    ];

    /// The Kubernetes kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Service => "Service",
            ResourceKind::HttpRoute => "HTTPRoute",
            ResourceKind::TlsRoute => "TLSRoute",
            ResourceKind::GrpcRoute => "GRPCRoute",
            ResourceKind::DnsEndpoint => "DNSEndpoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ingress" => Ok(ResourceKind::Ingress),
            "Service" => Ok(ResourceKind::Service),
            "HTTPRoute" => Ok(ResourceKind::HttpRoute),
            "TLSRoute" => Ok(ResourceKind::TlsRoute),
            "GRPCRoute" => Ok(ResourceKind::GrpcRoute),
            "DNSEndpoint" => Ok(ResourceKind::DnsEndpoint),
            _ => Err(()),
        }
    }
}

/// Resolves hostname index keys to an [`AddressBundle`].
///
/// One implementation exists per enabled resource kind, binding its hostname
/// index to its address extractor.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Probes the index with the given keys and returns every address the
    /// matched objects currently expose.
    async fn lookup(&self, keys: &[String]) -> AddressBundle;
}

/// Lookup installed for catalog kinds that are not enabled.
pub struct NoopLookup;

#[async_trait]
impl Lookup for NoopLookup {
    async fn lookup(&self, _keys: &[String]) -> AddressBundle {
        AddressBundle::default()
    }
}

/// One registry slot: a resource kind and its lookup.
pub struct ResourceEntry {
    /// The resource kind this entry answers for.
    pub kind: ResourceKind,
    /// The bound lookup; [`NoopLookup`] until a watcher enables the kind.
    pub lookup: Arc<dyn Lookup>,
}

/// Ordered table of enabled resource kinds.
pub struct Registry {
    entries: Vec<ResourceEntry>,
}

impl Registry {
    /// Builds a registry from configured resource names, preserving their
    /// order. Unknown names are logged and ignored; every accepted entry
    /// starts with a no-op lookup.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut entries: Vec<ResourceEntry> = Vec::new();
        for name in names {
            let name = name.as_ref();
            match name.parse::<ResourceKind>() {
                Ok(kind) => {
                    if entries.iter().any(|e| e.kind == kind) {
                        debug!(resource = name, "resource listed twice, keeping first position");
                        continue;
                    }
                    entries.push(ResourceEntry {
                        kind,
                        lookup: Arc::new(NoopLookup),
                    });
                }
                Err(()) => warn!(resource = name, "unknown resource kind, ignoring"),
            }
        }
        Self { entries }
    }

    /// The entries in registration (precedence) order.
    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    /// Whether `kind` was configured.
    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    /// Replaces the lookup bound to `kind`. Only called while the controller
    /// is wiring up watchers at startup. Returns false when the kind was not
    /// configured.
    pub fn set_lookup(&mut self, kind: ResourceKind, lookup: Arc<dyn Lookup>) -> bool {
        match self.entries.iter_mut().find(|e| e.kind == kind) {
            Some(entry) => {
                debug!(resource = %kind, "lookup installed");
                entry.lookup = lookup;
                true
            }
            None => false,
        }
    }
}
