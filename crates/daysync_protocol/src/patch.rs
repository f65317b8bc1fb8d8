//! Patch operations sent to clients on pull.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step a client applies to its local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum PatchOp {
    /// Insert or replace the value stored under `key`.
    #[serde(rename = "put")]
    Upsert {
        /// Cache key, e.g. `task/123`.
        key: String,
        /// New value.
        value: Value,
    },
    /// Remove `key` from the cache.
    #[serde(rename = "del")]
    Delete {
        /// Cache key.
        key: String,
    },
}

impl PatchOp {
    /// Creates an upsert.
    pub fn upsert(key: impl Into<String>, value: Value) -> Self {
        PatchOp::Upsert {
            key: key.into(),
            value,
        }
    }

    /// Creates a delete.
    pub fn delete(key: impl Into<String>) -> Self {
        PatchOp::Delete { key: key.into() }
    }

    /// Returns the key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            PatchOp::Upsert { key, .. } | PatchOp::Delete { key } => key,
        }
    }

    /// Returns true for deletes.
    pub fn is_delete(&self) -> bool {
        matches!(self, PatchOp::Delete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let put = serde_json::to_value(PatchOp::upsert("idea/1", json!({"title": "x"}))).unwrap();
        assert_eq!(put, json!({"op": "put", "key": "idea/1", "value": {"title": "x"}}));

        let del = serde_json::to_value(PatchOp::delete("idea/1")).unwrap();
        assert_eq!(del, json!({"op": "del", "key": "idea/1"}));
    }

    #[test]
    fn accessors() {
        let op = PatchOp::delete("list/9");
        assert_eq!(op.key(), "list/9");
        assert!(op.is_delete());
        assert!(!PatchOp::upsert("list/9", json!(null)).is_delete());
    }
}
