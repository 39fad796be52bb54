//! Metrics instrumentation for kube-gateway-dns.
//!
//! All metrics are prefixed with `kube_gateway_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, outcome: QueryOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        QueryOutcome::Answered => "answered",
        QueryOutcome::NoData => "no_data",
        QueryOutcome::NxDomain => "nxdomain",
        QueryOutcome::NotReady => "not_ready",
        QueryOutcome::Delegated => "delegated",
    };

    counter!("kube_gateway_dns.query.count", "type" => record_type.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("kube_gateway_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryOutcome {
    /// Query answered with records.
    Answered,
    /// Name exists but holds no data of the requested type.
    NoData,
    /// Name not found.
    NxDomain,
    /// Resource caches not synced yet (SERVFAIL).
    NotReady,
    /// Query handed to the next handler (out of zone or fallthrough).
    Delegated,
}

/// Record one cluster watch event.
pub fn record_watch_event(kind: &'static str, event_type: WatchEventType) {
    let event_str = match event_type {
        WatchEventType::InitApply => "init_apply",
        WatchEventType::InitDone => "init_done",
        WatchEventType::Apply => "apply",
        WatchEventType::Delete => "delete",
    };

    counter!("kube_gateway_dns.watch.event.count", "kind" => kind, "event" => event_str)
        .increment(1);
}

/// Cluster watch event types.
#[derive(Debug, Clone, Copy)]
pub enum WatchEventType {
    /// Object delivered during the initial list.
    InitApply,
    /// Initial list complete, live streaming starts.
    InitDone,
    /// Object created or updated.
    Apply,
    /// Object deleted.
    Delete,
}

/// Record a watch stream error that triggers a backoff and reconnect.
pub fn record_watch_restart(kind: &'static str) {
    counter!("kube_gateway_dns.watch.restart.count", "kind" => kind).increment(1);
}

/// Record the size of one hostname index.
pub fn record_index_size(kind: &'static str, hostnames: usize, objects: usize) {
    gauge!("kube_gateway_dns.index.hostnames", "kind" => kind).set(hostnames as f64);
    gauge!("kube_gateway_dns.index.objects", "kind" => kind).set(objects as f64);
}

/// Record whether all resource caches have synced.
pub fn record_sync_state(synced: bool) {
    gauge!("kube_gateway_dns.synced").set(if synced { 1.0 } else { 0.0 });
}

/// Record the number of records in a successful answer.
pub fn record_answer_size(record_type: &str, count: usize) {
    histogram!("kube_gateway_dns.query.answer_records", "type" => record_type.to_string())
        .record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
