//! Per-turn context attached to bus messages.
//!
//! A context is a JSON object that parser modules enrich as an utterance moves through
//! the pipeline. Stage outputs are deep-merged: nested objects merge key by key, any
//! other value from a later stage replaces the earlier one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the nested object holding stage timestamps and durations.
pub const TIMING_KEY: &str = "timing";

/// Context mapping carried by a message for one utterance turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Deep-merge `delta` into this context.
    pub fn merge(&mut self, delta: Map<String, Value>) {
        merge_maps(&mut self.0, delta);
    }

    /// Whether a non-empty timing object is present.
    pub fn has_timing(&self) -> bool {
        self.0
            .get(TIMING_KEY)
            .and_then(Value::as_object)
            .is_some_and(|timing| !timing.is_empty())
    }

    /// Make sure `timing` is an object, replacing anything else stored under the key.
    pub fn ensure_timing(&mut self) -> &mut Map<String, Value> {
        let slot = self
            .0
            .entry(TIMING_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(timing) => timing,
            _ => unreachable!("timing slot was just set to an object"),
        }
    }

    pub fn timing(&self, key: &str) -> Option<f64> {
        self.0
            .get(TIMING_KEY)
            .and_then(Value::as_object)
            .and_then(|timing| timing.get(key))
            .and_then(Value::as_f64)
    }

    pub fn set_timing(&mut self, key: &str, value: f64) {
        self.ensure_timing().insert(key.to_string(), Value::from(value));
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Recursively merge `delta` into `base`.
///
/// Objects present on both sides merge key by key; everything else is overwritten
/// by the value from `delta`.
pub fn merge_maps(base: &mut Map<String, Value>, delta: Map<String, Value>) {
    for (key, value) in delta {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
