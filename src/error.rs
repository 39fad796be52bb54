//! Error types for kube-gateway-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes API client error
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig file could not be read or applied
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Neither in-cluster config nor a local kubeconfig could be inferred
    #[error("cluster config inference error: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Resource caches not synced
    #[error("resource caches not synced - initial list incomplete")]
    NotSynced,
}
