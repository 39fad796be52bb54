//! Hostname validation and DNS label helpers.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum length of a domain name, excluding the trailing dot.
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

fn dns1123_subdomain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Same grammar Kubernetes applies to metadata labels.
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("static regex must compile")
    })
}

/// Whether `domain` is a syntactically valid DNS name that also conforms to
/// the RFC 1123 subdomain grammar.
///
/// Uppercase input fails the check; annotation values are lowercased before
/// they get here.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }
    if domain.split('.').any(|label| label.len() > MAX_LABEL_LEN) {
        return false;
    }
    dns1123_subdomain().is_match(domain)
}

/// Strips the closing dot unless the name is the root.
pub fn strip_trailing_dot(s: &str) -> &str {
    if s.len() > 1 {
        s.strip_suffix('.').unwrap_or(s)
    } else {
        s
    }
}

/// Strips the zone suffix from a fully qualified query name, returning the
/// bare hostname part. `zone` must be a suffix of `qname`.
pub fn strip_zone<'a>(qname: &'a str, zone: &str) -> &'a str {
    let end = qname.len().saturating_sub(zone.len());
    strip_trailing_dot(&qname[..end])
}

/// Synthesizes the wildcard query name for `qname` by replacing its leftmost
/// label with `*`. Returns `None` when the name has no labels besides the
/// zone itself; multi-level wildcards are not supported.
pub fn to_wildcard_qname(qname: &str, zone: &str) -> Option<String> {
    let zoneless = strip_zone(qname, zone);
    if zoneless.is_empty() {
        return None;
    }

    let mut parts: Vec<&str> = zoneless.split('.').collect();
    parts[0] = "*";
    Some(format!("{}.{}", parts.join("."), zone))
}

/// Splits a string into chunks that fit a TXT character-string (255 bytes).
pub fn split255(s: &str) -> Vec<String> {
    if s.len() < 255 {
        return vec![s.to_string()];
    }

    s.as_bytes()
        .chunks(255)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}
