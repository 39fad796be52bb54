//! Query engine: derives the index key sets for a query name and probes the
//! resource registry in precedence order.

use tracing::{debug, trace};

use crate::hostname::{strip_trailing_dot, strip_zone, to_wildcard_qname};
use crate::registry::{AddressBundle, Registry};

/// Index keys for one query name within `zone`: the name with its closing
/// dot stripped and, when distinct, the zoneless hostname part. The second
/// form is how Services are indexed (`name.namespace` carries no zone).
pub fn index_keys(qname: &str, zone: &str) -> Vec<String> {
    let zoneless = strip_zone(qname, zone);
    let stripped = strip_trailing_dot(qname);
    if !zoneless.is_empty() && zoneless != stripped {
        vec![stripped.to_string(), zoneless.to_string()]
    } else {
        vec![stripped.to_string()]
    }
}

/// All key sets to probe for a query, most specific first: the exact name,
/// then the wildcard form with the leftmost label replaced by `*`. The
/// wildcard set is absent when the name has no labels below the zone.
pub fn index_key_sets(qname: &str, zone: &str) -> Vec<Vec<String>> {
    let specific = index_keys(qname, zone);
    match to_wildcard_qname(qname, zone) {
        Some(wildcard) => vec![specific, index_keys(&wildcard, zone)],
        None => vec![specific],
    }
}

/// Probes every registry entry with each key set in order and returns the
/// first non-empty bundle. A bundle counts as non-empty when *any* record
/// type holds a value, so an A-only match still settles AAAA and TXT
/// queries for the same name; kinds and key sets are never merged.
pub async fn matching_addresses(registry: &Registry, key_sets: &[Vec<String>]) -> AddressBundle {
    for keys in key_sets {
        for entry in registry.entries() {
            trace!(resource = %entry.kind, keys = ?keys, "probing lookup");
            let bundle = entry.lookup.lookup(keys).await;
            if !bundle.is_empty() {
                debug!(resource = %entry.kind, keys = ?keys, "lookup matched");
                return bundle;
            }
        }
    }
    AddressBundle::default()
}
