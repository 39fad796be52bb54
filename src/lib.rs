//! kube-gateway-dns - An authoritative DNS server backed by live Kubernetes state.
//!
//! This crate provides a DNS server that answers queries for configured zones
//! by reflecting what is currently running in a Kubernetes cluster: Ingresses,
//! load-balanced Services, Gateway API routes attached to Gateways, and
//! external-dns `DNSEndpoint` resources all publish hostnames, and the server
//! turns those into A/AAAA/TXT answers with SOA/NS handling at the zone apex.
//!
//! ## Features
//!
//! - Real-time answers via cluster watches, no zone files
//! - Deterministic precedence across resource kinds, with wildcard fallback
//! - Authoritative semantics: NXDOMAIN vs NOERROR at the apex, RFC 4074
//!   behavior for AAAA, SOA/NS for the zone itself
//! - Fallthrough to a chained handler for unanswered names
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        kube-gateway-dns                          │
//! │                                                                  │
//! │  ┌──────────────────┐     ┌───────────────────┐                 │
//! │  │ Cluster watchers │────▶│ Hostname indexes  │                 │
//! │  │ (one per kind)   │     │ (per kind, in-mem)│                 │
//! │  └──────────────────┘     └─────────┬─────────┘                 │
//! │         │ Watch:                    │                           │
//! │         │ - Ingress                 ▼                           │
//! │         │ - Service          ┌───────────────────┐              │
//! │         │ - HTTPRoute        │ Query engine      │              │
//! │         │ - TLSRoute         │ (registry probe)  │              │
//! │         │ - GRPCRoute        └─────────┬─────────┘              │
//! │         │ - DNSEndpoint               │                        │
//! │         │ - Gateway                   ▼                        │
//! │         │                    ┌───────────────────┐◀── UDP/TCP  │
//! │         └───────────────────▶│ Hickory DNS server│     :53     │
//! │                              └───────────────────┘              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! svc1.ns1.example.com
//!   → derive index keys [svc1.ns1.example.com, svc1.ns1]
//!   → probe resource kinds in registration order, wildcard as fallback
//!   → first non-empty address bundle wins
//!   → A/AAAA/TXT answer, de-duplicated
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use kube_gateway_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = config::Config::builder()
//!         .add_source(config::File::with_name("kube-gateway-dns.toml"))
//!         .build()
//!         .unwrap()
//!         .try_deserialize()
//!         .unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     let server = DnsServer::new(config.dns.normalized().unwrap());
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod handler;
pub mod hostname;
pub mod index;
pub mod kubernetes;
pub mod lookup;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DnsConfig, TelemetryConfig};
pub use error::GatewayError;
pub use handler::{DnsHandler, NoNextHandler};
pub use kubernetes::{KubeController, SyncFlag};
pub use registry::{AddressBundle, Registry, ResourceKind};
pub use server::DnsServer;
