//! kube-gateway-dns binary entry point.

use clap::Parser;
use kube_gateway_dns::{telemetry, Config, DnsServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Authoritative DNS server backed by live Kubernetes state.
#[derive(Parser, Debug)]
#[command(name = "kube-gateway-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "kube-gateway-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("KUBE_GATEWAY_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        zones = ?config.dns.zones,
        "Starting kube-gateway-dns"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // Run DNS server
    let server = DnsServer::new(config.dns.normalized()?);
    let result = server.run(shutdown).await;

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("kube-gateway-dns shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            error!(%err, "failed to install SIGTERM handler, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
