//! Client mutations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single client-originated state change.
///
/// `mutation_id` is assigned by the client and is strictly increasing per
/// client. The server applies a mutation only when its id is exactly one
/// past the client's last applied id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Client that issued the mutation. Defaults to the pushing client.
    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Per-client ordinal.
    #[serde(rename = "id")]
    pub mutation_id: u64,
    /// Mutator name, e.g. `createItem`.
    pub name: String,
    /// Mutator arguments.
    #[serde(default)]
    pub args: Value,
}

impl MutationRecord {
    /// Creates a mutation that inherits the pushing client's id.
    pub fn new(mutation_id: u64, name: impl Into<String>, args: Value) -> Self {
        Self {
            client_id: None,
            mutation_id,
            name: name.into(),
            args,
        }
    }

    /// Sets an explicit client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Returns true if this mutation belongs to `client_id`.
    ///
    /// Mutations without an explicit client id belong to whoever pushed them.
    pub fn belongs_to(&self, client_id: &str) -> bool {
        self.client_id.as_deref().map_or(true, |id| id == client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_wire_shape() {
        let raw = r#"{"id":3,"name":"createItem","args":{"id":"t1","title":"Milk"}}"#;
        let mutation: MutationRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(mutation.mutation_id, 3);
        assert_eq!(mutation.name, "createItem");
        assert_eq!(mutation.args["title"], "Milk");
        assert!(mutation.client_id.is_none());
    }

    #[test]
    fn missing_args_default_to_null() {
        let mutation: MutationRecord =
            serde_json::from_str(r#"{"clientID":"c1","id":1,"name":"noop"}"#).unwrap();
        assert!(mutation.args.is_null());
        assert_eq!(mutation.client_id.as_deref(), Some("c1"));
    }

    #[test]
    fn ownership() {
        let implicit = MutationRecord::new(1, "createIdea", json!({}));
        assert!(implicit.belongs_to("anyone"));

        let explicit = implicit.with_client_id("c1");
        assert!(explicit.belongs_to("c1"));
        assert!(!explicit.belongs_to("c2"));
    }
}
