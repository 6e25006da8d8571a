//! Canonical query documents.
//!
//! Client queries and cached datalog queries are opaque structured
//! values to the store, but they are *identities*: the subscription
//! graph joins on them and the unique indexes key by them. [`QueryDoc`]
//! pins an opaque JSON value to a canonical text form (serde_json's
//! sorted-key serialization) with a cached xxh3 fingerprint, so the
//! same logical query always lands on the same index slot regardless of
//! how the client happened to order its keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

/// An opaque structured value with canonical identity.
///
/// Cheap to clone; equality and ordering use the canonical text, the
/// hash uses the cached 64-bit fingerprint.
#[derive(Clone)]
pub struct QueryDoc {
    json: Arc<serde_json::Value>,
    canon: Arc<str>,
    hash: u64,
}

impl QueryDoc {
    /// Build a document from a JSON value.
    #[must_use]
    pub fn new(json: serde_json::Value) -> Self {
        // serde_json maps are BTreeMaps, so `to_string` is already
        // key-sorted and canonical.
        let canon: Arc<str> = json.to_string().into();
        let hash = xxh3_64(canon.as_bytes());
        Self {
            json: Arc::new(json),
            canon,
            hash,
        }
    }

    /// The canonical serialized form.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canon
    }

    /// The parsed JSON value.
    #[must_use]
    pub fn json(&self) -> &serde_json::Value {
        &self.json
    }

    /// Cached xxh3 fingerprint of the canonical form.
    #[inline]
    #[must_use]
    pub fn hash64(&self) -> u64 {
        self.hash
    }
}

impl fmt::Debug for QueryDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryDoc({})", self.canon)
    }
}

impl fmt::Display for QueryDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canon)
    }
}

impl PartialEq for QueryDoc {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.canon == other.canon
    }
}

impl Eq for QueryDoc {}

impl PartialOrd for QueryDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canon.cmp(&other.canon)
    }
}

impl Hash for QueryDoc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl From<serde_json::Value> for QueryDoc {
    fn from(json: serde_json::Value) -> Self {
        Self::new(json)
    }
}

impl serde::Serialize for QueryDoc {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.json.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for QueryDoc {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = QueryDoc::new(json!({"todos": {}, "users": {"limit": 5}}));
        let b = QueryDoc::new(json!({"users": {"limit": 5}, "todos": {}}));
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn distinct_queries_differ() {
        let a = QueryDoc::new(json!({"todos": {}}));
        let b = QueryDoc::new(json!({"todos": {"limit": 1}}));
        assert_ne!(a, b);
    }

    #[test]
    fn serde_round_trip() {
        let a = QueryDoc::new(json!({"goals": {"$": {"where": {"done": false}}}}));
        let text = serde_json::to_string(&a).unwrap();
        let back: QueryDoc = serde_json::from_str(&text).unwrap();
        assert_eq!(a, back);
    }
}
