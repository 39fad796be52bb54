//! In-memory hostname indexes fed by cluster watches.
//!
//! Each watched resource kind owns one [`ResourceIndex`]: a map from
//! lowercase hostname key to the live objects that declare it. Watch events
//! mutate the index; query handlers read point-in-time snapshots through
//! [`ResourceIndex::get`]. A relist fills a staging generation that is
//! swapped in atomically on `InitDone`, so queries never observe a
//! half-rebuilt index.

use kube::runtime::watcher::Event;
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::metrics::{self, WatchEventType};

/// Computes the index keys for one object.
pub type IndexerFn<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

struct Maps<K> {
    /// lowercase hostname key -> object key -> object
    by_key: HashMap<String, HashMap<String, Arc<K>>>,
    /// object key -> hostname keys it is indexed under
    by_object: HashMap<String, Vec<String>>,
}

impl<K> Default for Maps<K> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_object: HashMap::new(),
        }
    }
}

impl<K> Maps<K> {
    fn upsert(&mut self, object_key: String, keys: Vec<String>, obj: Arc<K>) {
        self.remove(&object_key);
        for key in &keys {
            self.by_key
                .entry(key.clone())
                .or_default()
                .insert(object_key.clone(), obj.clone());
        }
        if !keys.is_empty() {
            self.by_object.insert(object_key, keys);
        }
    }

    fn remove(&mut self, object_key: &str) {
        if let Some(keys) = self.by_object.remove(object_key) {
            for key in keys {
                if let Some(objects) = self.by_key.get_mut(&key) {
                    objects.remove(object_key);
                    if objects.is_empty() {
                        self.by_key.remove(&key);
                    }
                }
            }
        }
    }
}

struct Inner<K> {
    live: Maps<K>,
    staging: Option<Maps<K>>,
    ready: bool,
}

/// Hostname-keyed cache of one resource kind, safe for concurrent reads
/// while the watcher task writes.
pub struct ResourceIndex<K> {
    kind: &'static str,
    indexer: IndexerFn<K>,
    inner: Arc<RwLock<Inner<K>>>,
}

impl<K> Clone for ResourceIndex<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            indexer: self.indexer.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<K> ResourceIndex<K>
where
    K: Resource<DynamicType = ()>,
{
    /// Creates an empty, not-yet-ready index for `kind`.
    pub fn new(
        kind: &'static str,
        indexer: impl Fn(&K) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            indexer: Arc::new(indexer),
            inner: Arc::new(RwLock::new(Inner {
                live: Maps::default(),
                staging: None,
                ready: false,
            })),
        }
    }

    /// The resource kind this index serves, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Applies one watch event.
    pub fn apply(&self, event: Event<K>) {
        match event {
            Event::Init => {
                debug!(kind = self.kind, "initial list started");
                self.inner.write().staging = Some(Maps::default());
            }
            Event::InitApply(obj) => {
                metrics::record_watch_event(self.kind, WatchEventType::InitApply);
                let (object_key, keys, obj) = self.index_object(obj);
                let mut inner = self.inner.write();
                match inner.staging.as_mut() {
                    Some(staging) => staging.upsert(object_key, keys, obj),
                    // An InitApply without Init; treat it as a live upsert.
                    None => inner.live.upsert(object_key, keys, obj),
                }
            }
            Event::InitDone => {
                metrics::record_watch_event(self.kind, WatchEventType::InitDone);
                let mut inner = self.inner.write();
                if let Some(staging) = inner.staging.take() {
                    inner.live = staging;
                }
                inner.ready = true;
                debug!(
                    kind = self.kind,
                    hostnames = inner.live.by_key.len(),
                    objects = inner.live.by_object.len(),
                    "initial list complete"
                );
            }
            Event::Apply(obj) => {
                metrics::record_watch_event(self.kind, WatchEventType::Apply);
                let (object_key, keys, obj) = self.index_object(obj);
                trace!(kind = self.kind, object = %object_key, keys = ?keys, "upserting object");
                self.inner.write().live.upsert(object_key, keys, obj);
            }
            Event::Delete(obj) => {
                metrics::record_watch_event(self.kind, WatchEventType::Delete);
                let object_key = object_key(&obj);
                trace!(kind = self.kind, object = %object_key, "removing object");
                self.inner.write().live.remove(&object_key);
            }
        }
    }

    fn index_object(&self, obj: K) -> (String, Vec<String>, Arc<K>) {
        let object_key = object_key(&obj);
        let keys: Vec<String> = (self.indexer)(&obj)
            .into_iter()
            .map(|k| k.to_ascii_lowercase())
            .collect();
        (object_key, keys, Arc::new(obj))
    }

    /// Returns a snapshot of the objects indexed under `key`
    /// (case-insensitive).
    pub fn get(&self, key: &str) -> Vec<Arc<K>> {
        let inner = self.inner.read();
        inner
            .live
            .by_key
            .get(&key.to_ascii_lowercase())
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the objects matching any of `keys`, concatenated in key
    /// order. An object matching several keys appears once per key; answers
    /// de-duplicate addresses later.
    pub fn get_all(&self, keys: &[String]) -> Vec<Arc<K>> {
        keys.iter().flat_map(|key| self.get(key)).collect()
    }

    /// Whether the initial list has completed.
    pub fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    /// Emits the index size gauges.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        metrics::record_index_size(
            self.kind,
            inner.live.by_key.len(),
            inner.live.by_object.len(),
        );
    }
}

fn object_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}
