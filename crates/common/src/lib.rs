//! Shared error taxonomy and result types used by every axon crate.

mod error;

pub use error::{Context, Error, ErrorKind, Result};

/// Deep-merge `patch` into `base`: objects merge recursively, everything else
/// (arrays included) replaces.
pub fn deep_merge(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(base_map.entry(k.clone()).or_insert(serde_json::Value::Null), v);
            }
        },
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        },
    }
}
