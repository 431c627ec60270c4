use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tag a server puts on values answered from its subscription cache.
/// Conditional cyclic queries require it on every delivered value.
pub const SERVER_CACHE_TAG: &str = "from_cf";

/// A single observed value: an opaque payload, the moment it was produced,
/// an optional type tag and free-form string-keyed metadata.
///
/// Equality compares the payload only; timestamps and tags are transport
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    /// Payload, opaque to this layer.
    pub v: rmpv::Value,

    /// Production time, epoch seconds.
    pub ts: f64,

    #[serde(rename = "type", default)]
    pub value_type: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, rmpv::Value>,
}

impl Value {
    pub fn new(v: impl Into<rmpv::Value>, ts: f64) -> Self {
        Self {
            v: v.into(),
            ts,
            value_type: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = Some(value_type.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<rmpv::Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// True if this value is older than `reference_ts - tolerance`.
    pub fn is_expired(&self, reference_ts: f64, tolerance: f64) -> bool {
        self.ts < reference_ts - tolerance
    }

    /// Marked by the server as answered from its subscription cache.
    pub fn is_server_cached(&self) -> bool {
        self.tags.contains_key(SERVER_CACHE_TAG)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.v == other.v
    }
}
