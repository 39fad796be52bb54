//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DnsConfig;
use crate::error::GatewayError;
use crate::handler::DnsHandler;
use crate::kubernetes::KubeController;
use crate::registry::Registry;

/// TCP connection idle timeout.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Authoritative DNS server answering from live Kubernetes state.
pub struct DnsServer {
    config: DnsConfig,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Self {
        Self { config }
    }

    /// Run the DNS server until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), GatewayError> {
        info!(
            listen_addr = %self.config.listen_addr,
            zones = ?self.config.zones,
            resources = ?self.config.resources,
            "starting kube-gateway-dns server"
        );

        let mut registry = Registry::from_names(&self.config.resources);
        let controller =
            KubeController::new(&self.config, &mut registry, shutdown.clone()).await?;

        info!("waiting for resource caches to sync");
        let budget = Duration::from_secs(self.config.sync_timeout_secs);
        if controller.wait_for_sync(budget, &shutdown).await {
            info!("initial cache sync complete");
        } else if shutdown.is_cancelled() {
            info!("shutdown requested before cache sync completed");
            controller.join().await;
            return Ok(());
        } else {
            warn!(
                timeout_secs = self.config.sync_timeout_secs,
                "resource caches did not sync in time, serving SERVFAIL until they do"
            );
        }

        let handler = DnsHandler::new(
            &self.config,
            Arc::new(registry),
            controller.sync_flag(),
        );
        let mut server = ServerFuture::new(handler);

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        info!(zones = ?self.config.zones, "DNS server ready to serve queries");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(err) = result {
                    error!(%err, "DNS server error");
                }
            }
        }

        info!("waiting for controller tasks to stop");
        controller.join().await;

        info!("DNS server stopped");
        Ok(())
    }

    /// The server's configuration.
    pub fn config(&self) -> &DnsConfig {
        &self.config
    }
}
