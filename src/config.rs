//! Configuration types for kube-gateway-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::GatewayError;
use crate::registry::ResourceKind;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for the DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones the server is authoritative for (e.g. "example.com").
    /// Normalized to lowercase with a trailing dot at startup; for queries
    /// matching several zones the longest match wins.
    pub zones: Vec<String>,

    /// Resource kinds to watch and answer from, in precedence order.
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,

    /// TTL for A/AAAA/TXT answers in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// TTL for SOA and NS records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_soa: u32,

    /// Label under which the server publishes its own addresses
    /// (`<apex>.<zone>` is the SOA MNAME and the NS target).
    #[serde(default = "default_apex")]
    pub apex: String,

    /// Local part of the hostmaster contact in the SOA RNAME.
    #[serde(default = "default_hostmaster")]
    pub hostmaster: String,

    /// Optional label of a second nameserver, answered alongside the apex
    /// label on NS queries.
    #[serde(default)]
    pub second_ns: Option<String>,

    /// Ingress classes to answer for; empty means all.
    #[serde(default)]
    pub ingress_classes: Vec<String>,

    /// Gateway classes to answer for; empty means all.
    #[serde(default)]
    pub gateway_classes: Vec<String>,

    /// Zones for which unanswered queries are passed to the next handler
    /// instead of returning NXDOMAIN. `.` covers everything; empty disables
    /// fallthrough.
    #[serde(default)]
    pub fallthrough_zones: Vec<String>,

    /// Path to a kubeconfig file. In-cluster configuration is inferred when
    /// unset.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context override.
    #[serde(default)]
    pub kube_context: Option<String>,

    /// How long startup waits for the resource caches to complete their
    /// initial list before serving anyway (SERVFAIL until synced).
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

impl DnsConfig {
    /// Validates the configuration and normalizes zone names. Called once at
    /// startup before anything consumes the config.
    pub fn normalized(mut self) -> Result<Self, GatewayError> {
        if self.zones.is_empty() {
            return Err(GatewayError::Config(
                "at least one zone is required".to_string(),
            ));
        }
        if self.resources.is_empty() {
            return Err(GatewayError::Config(
                "at least one resource kind is required".to_string(),
            ));
        }

        self.zones = self.zones.iter().map(|z| normalize_zone(z)).collect();
        self.fallthrough_zones = self
            .fallthrough_zones
            .iter()
            .map(|z| normalize_zone(z))
            .collect();
        self.apex = self.apex.trim_matches('.').to_ascii_lowercase();
        self.second_ns = self
            .second_ns
            .as_deref()
            .map(|ns| ns.trim_matches('.').to_ascii_lowercase())
            .filter(|ns| !ns.is_empty());

        Ok(self)
    }
}

/// Lowercases a zone name and ensures the trailing dot.
pub fn normalize_zone(zone: &str) -> String {
    let mut normalized = zone.trim().to_ascii_lowercase();
    if !normalized.ends_with('.') {
        normalized.push('.');
    }
    normalized
}

fn default_resources() -> Vec<String> {
    ResourceKind::ALL
        .iter()
        .map(|kind| kind.as_str().to_string())
        .collect()
}

fn default_ttl() -> u32 {
    60
}

fn default_apex() -> String {
    "dns1.kube-system".to_string()
}

fn default_hostmaster() -> String {
    "hostmaster".to_string()
}

fn default_sync_timeout() -> u64 {
    60
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "kube_gateway_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
