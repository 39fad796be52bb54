//! Kubernetes controller: builds the API client, discovers optional CRDs,
//! and runs one watch task per enabled resource kind, each feeding a
//! hostname index.
//!
//! Watchers are long-lived: the watch stream relists and backs off on
//! errors, and every relist rebuilds the index through a staging generation.
//! Startup wires the real lookups into the registry; kinds whose CRDs are
//! missing keep their no-op lookup and are only logged, never fatal.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher::{watcher, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DnsConfig;
use crate::crd::{DNSEndpoint, GRPCRoute, Gateway, HTTPRoute, TLSRoute};
use crate::error::GatewayError;
use crate::index::ResourceIndex;
use crate::lookup::{
    dns_endpoint_hostnames, gateway_key, ingress_hostnames, service_hostnames, DnsEndpointLookup,
    GatewayRoute, HostResolver, IngressLookup, RouteLookup, ServiceLookup, SystemResolver,
};
use crate::metrics;
use crate::registry::{Registry, ResourceKind};

const GATEWAY_CLASS_CRD: &str = "gatewayclasses.gateway.networking.k8s.io";
const DNS_ENDPOINT_CRD: &str = "dnsendpoints.externaldns.k8s.io";

/// Interval between readiness polls and state metric emissions.
const MONITOR_POLL: Duration = Duration::from_millis(100);
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Shared flag flipped once every watched cache has completed its initial
/// list. Queries received before that answer SERVFAIL.
#[derive(Clone, Debug, Default)]
pub struct SyncFlag(Arc<AtomicBool>);

impl SyncFlag {
    /// A new, not-yet-synced flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the caches synced. The flag never flips back; relists keep
    /// serving the previous generation.
    pub fn mark_synced(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the caches have synced.
    pub fn is_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owns the watch tasks and the sync state for all enabled resource kinds.
pub struct KubeController {
    sync_flag: SyncFlag,
    tasks: Vec<JoinHandle<()>>,
}

impl KubeController {
    /// Connects to the cluster, wires one watcher per enabled kind into
    /// `registry`, and starts the background tasks. Kinds backed by a
    /// missing CRD are skipped with a warning.
    pub async fn new(
        config: &DnsConfig,
        registry: &mut Registry,
        shutdown: CancellationToken,
    ) -> Result<Self, GatewayError> {
        info!("building kubernetes controller");
        let client = build_client(config).await?;
        let resolver: Arc<dyn HostResolver> = Arc::new(SystemResolver);

        let mut ctrl = Self {
            sync_flag: SyncFlag::new(),
            tasks: Vec::new(),
        };
        let mut ready_checks: Vec<Box<dyn Fn() -> bool + Send + Sync>> = Vec::new();
        let mut emitters: Vec<Box<dyn Fn() + Send + Sync>> = Vec::new();

        let wants_routes = ResourceKind::ROUTES
            .iter()
            .any(|kind| registry.contains(*kind));
        if wants_routes {
            if crd_exists(&client, GATEWAY_CLASS_CRD).await {
                // Routes resolve their parents through a shared Gateway
                // index keyed by namespace/name.
                let gateways: ResourceIndex<Gateway> = ResourceIndex::new("Gateway", gateway_key);
                ctrl.watch(
                    client.clone(),
                    gateways.clone(),
                    &shutdown,
                    &mut ready_checks,
                    &mut emitters,
                );

                if registry.contains(ResourceKind::HttpRoute) {
                    let index: ResourceIndex<HTTPRoute> =
                        ResourceIndex::new("HTTPRoute", |route: &HTTPRoute| route.hostnames());
                    ctrl.watch(
                        client.clone(),
                        index.clone(),
                        &shutdown,
                        &mut ready_checks,
                        &mut emitters,
                    );
                    registry.set_lookup(
                        ResourceKind::HttpRoute,
                        Arc::new(RouteLookup::new(
                            index,
                            gateways.clone(),
                            config.gateway_classes.clone(),
                            resolver.clone(),
                        )),
                    );
                    info!("HTTPRoute watcher initialized");
                }

                if registry.contains(ResourceKind::TlsRoute) {
                    let index: ResourceIndex<TLSRoute> =
                        ResourceIndex::new("TLSRoute", |route: &TLSRoute| route.hostnames());
                    ctrl.watch(
                        client.clone(),
                        index.clone(),
                        &shutdown,
                        &mut ready_checks,
                        &mut emitters,
                    );
                    registry.set_lookup(
                        ResourceKind::TlsRoute,
                        Arc::new(RouteLookup::new(
                            index,
                            gateways.clone(),
                            config.gateway_classes.clone(),
                            resolver.clone(),
                        )),
                    );
                    info!("TLSRoute watcher initialized");
                }

                if registry.contains(ResourceKind::GrpcRoute) {
                    let index: ResourceIndex<GRPCRoute> =
                        ResourceIndex::new("GRPCRoute", |route: &GRPCRoute| route.hostnames());
                    ctrl.watch(
                        client.clone(),
                        index.clone(),
                        &shutdown,
                        &mut ready_checks,
                        &mut emitters,
                    );
                    registry.set_lookup(
                        ResourceKind::GrpcRoute,
                        Arc::new(RouteLookup::new(
                            index,
                            gateways,
                            config.gateway_classes.clone(),
                            resolver.clone(),
                        )),
                    );
                    info!("GRPCRoute watcher initialized");
                }
            } else {
                warn!(
                    crd = GATEWAY_CLASS_CRD,
                    "Gateway API not installed, route resources disabled"
                );
            }
        }

        if registry.contains(ResourceKind::Ingress) {
            let index: ResourceIndex<Ingress> = ResourceIndex::new("Ingress", ingress_hostnames);
            ctrl.watch(
                client.clone(),
                index.clone(),
                &shutdown,
                &mut ready_checks,
                &mut emitters,
            );
            registry.set_lookup(
                ResourceKind::Ingress,
                Arc::new(IngressLookup::new(
                    index,
                    config.ingress_classes.clone(),
                    resolver.clone(),
                )),
            );
            info!("Ingress watcher initialized");
        }

        if registry.contains(ResourceKind::Service) {
            let index: ResourceIndex<Service> = ResourceIndex::new("Service", service_hostnames);
            ctrl.watch(
                client.clone(),
                index.clone(),
                &shutdown,
                &mut ready_checks,
                &mut emitters,
            );
            registry.set_lookup(
                ResourceKind::Service,
                Arc::new(ServiceLookup::new(index, resolver.clone())),
            );
            info!("Service watcher initialized");
        }

        if registry.contains(ResourceKind::DnsEndpoint) {
            if crd_exists(&client, DNS_ENDPOINT_CRD).await {
                let index: ResourceIndex<DNSEndpoint> =
                    ResourceIndex::new("DNSEndpoint", dns_endpoint_hostnames);
                ctrl.watch(
                    client.clone(),
                    index.clone(),
                    &shutdown,
                    &mut ready_checks,
                    &mut emitters,
                );
                registry.set_lookup(
                    ResourceKind::DnsEndpoint,
                    Arc::new(DnsEndpointLookup::new(index)),
                );
                info!("DNSEndpoint watcher initialized");
            } else {
                warn!(
                    crd = DNS_ENDPOINT_CRD,
                    "DNSEndpoint CRD not installed, resource disabled"
                );
            }
        }

        ctrl.tasks.push(tokio::spawn(monitor_loop(
            ctrl.sync_flag.clone(),
            ready_checks,
            emitters,
            shutdown,
        )));

        Ok(ctrl)
    }

    fn watch<K>(
        &mut self,
        client: Client,
        index: ResourceIndex<K>,
        shutdown: &CancellationToken,
        ready_checks: &mut Vec<Box<dyn Fn() -> bool + Send + Sync>>,
        emitters: &mut Vec<Box<dyn Fn() + Send + Sync>>,
    ) where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        {
            let index = index.clone();
            ready_checks.push(Box::new(move || index.is_ready()));
        }
        {
            let index = index.clone();
            emitters.push(Box::new(move || index.emit_metrics()));
        }

        let shutdown = shutdown.clone();
        self.tasks
            .push(tokio::spawn(watch_resource(client, index, shutdown)));
    }

    /// Handle on the shared sync flag, for the DNS handler.
    pub fn sync_flag(&self) -> SyncFlag {
        self.sync_flag.clone()
    }

    /// Whether every watched cache has completed its initial list.
    pub fn has_synced(&self) -> bool {
        self.sync_flag.is_synced()
    }

    /// Waits up to `budget` for all caches to sync. Returns false on
    /// timeout or shutdown; watchers keep retrying in the background either
    /// way.
    pub async fn wait_for_sync(&self, budget: Duration, shutdown: &CancellationToken) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if self.has_synced() {
                return true;
            }
            if shutdown.is_cancelled() || tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(MONITOR_POLL).await;
        }
    }

    /// Waits for all background tasks after the shutdown token fired.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Flips the sync flag once every index is ready, then emits state metrics
/// periodically.
async fn monitor_loop(
    sync_flag: SyncFlag,
    ready_checks: Vec<Box<dyn Fn() -> bool + Send + Sync>>,
    emitters: Vec<Box<dyn Fn() + Send + Sync>>,
    shutdown: CancellationToken,
) {
    metrics::record_sync_state(false);

    let mut poll = tokio::time::interval(MONITOR_POLL);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,

            _ = poll.tick() => {
                if ready_checks.iter().all(|check| check()) {
                    sync_flag.mark_synced();
                    metrics::record_sync_state(true);
                    info!("all resource caches synced");
                    break;
                }
            }
        }
    }

    let mut tick = tokio::time::interval(METRICS_INTERVAL);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("state metrics loop shutting down");
                return;
            }

            _ = tick.tick() => {
                for emit in &emitters {
                    emit();
                }
            }
        }
    }
}

/// Runs one cluster-wide watch, applying every event to the index. The
/// stream relists and backs off internally; errors surface here only for
/// logging and accounting.
async fn watch_resource<K>(client: Client, index: ResourceIndex<K>, shutdown: CancellationToken)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let api: Api<K> = Api::all(client);
    let mut stream = watcher(api, WatcherConfig::default())
        .default_backoff()
        .boxed();

    info!(kind = index.kind(), "watch started");
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(kind = index.kind(), "watch shutting down");
                return;
            }

            event = stream.next() => match event {
                Some(Ok(event)) => index.apply(event),
                Some(Err(err)) => {
                    warn!(kind = index.kind(), %err, "watch error, backing off");
                    metrics::record_watch_restart(index.kind());
                }
                None => {
                    warn!(kind = index.kind(), "watch stream ended");
                    return;
                }
            }
        }
    }
}

/// Builds the API client from an explicit kubeconfig (with optional context
/// override) or infers the in-cluster / local configuration.
async fn build_client(config: &DnsConfig) -> Result<Client, GatewayError> {
    let client_config = match &config.kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), context = ?config.kube_context, "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)?;
            let options = KubeConfigOptions {
                context: config.kube_context.clone(),
                ..Default::default()
            };
            kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        None => kube::Config::infer().await?,
    };

    Ok(Client::try_from(client_config)?)
}

/// Probes the apiextensions API for a CRD. Any failure counts as absent;
/// missing CRDs disable their kind rather than failing startup.
async fn crd_exists(client: &Client, name: &str) -> bool {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    match api.get_opt(name).await {
        Ok(Some(_)) => {
            info!(crd = name, "custom resource definition found");
            true
        }
        Ok(None) => {
            warn!(crd = name, "custom resource definition not found");
            false
        }
        Err(err) => {
            warn!(crd = name, %err, "error getting custom resource definition");
            false
        }
    }
}
