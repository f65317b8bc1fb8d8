//! Protocol messages for sync.
//!
//! Field names follow the JSON shapes the web clients already send, so every
//! struct carries explicit `serde` renames.

use crate::cookie::Cookie;
use crate::mutation::MutationRecord;
use crate::patch::PatchOp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Client id to new last mutation id, for clients that advanced.
pub type LastMutationIdChanges = BTreeMap<String, u64>;

/// Client view reference as sent by clients (`{"name": "..."}`).
///
/// Kept as a raw string so unknown names reach the server and are rejected
/// with a protocol error rather than a decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientViewRef {
    /// Wire name of the view.
    pub name: String,
}

impl ClientViewRef {
    /// Creates a view reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Pull request from client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// View to pull.
    #[serde(rename = "clientView")]
    pub client_view: ClientViewRef,
    /// Pulling client.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Cookie from the previous response, if any.
    #[serde(default)]
    pub cookie: Option<String>,
}

impl PullRequest {
    /// Creates a new pull request.
    pub fn new(
        client_view: impl Into<String>,
        client_id: impl Into<String>,
        cookie: Option<&Cookie>,
    ) -> Self {
        Self {
            client_view: ClientViewRef::new(client_view),
            client_id: client_id.into(),
            cookie: cookie.map(Cookie::encode),
        }
    }
}

/// Pull response from server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Fresh cookie.
    pub cookie: String,
    /// The pulling client's last applied mutation id.
    #[serde(rename = "lastMutationID")]
    pub last_mutation_id: u64,
    /// Clients whose ordinal moved relative to the supplied cookie.
    #[serde(rename = "lastMutationIDChanges", default)]
    pub last_mutation_id_changes: LastMutationIdChanges,
    /// Operations that bring the client to the current state.
    pub patch: Vec<PatchOp>,
}

impl PullResponse {
    /// Creates a new pull response.
    pub fn new(
        cookie: &Cookie,
        last_mutation_id_changes: LastMutationIdChanges,
        patch: Vec<PatchOp>,
    ) -> Self {
        Self {
            cookie: cookie.encode(),
            last_mutation_id: cookie.last_mutation_id,
            last_mutation_id_changes,
            patch,
        }
    }
}

/// Push request from client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// View the mutations target.
    #[serde(rename = "clientView")]
    pub client_view: ClientViewRef,
    /// Pushing client.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Mutations in causal order.
    #[serde(default)]
    pub mutations: Vec<MutationRecord>,
}

impl PushRequest {
    /// Creates a new push request.
    pub fn new(
        client_view: impl Into<String>,
        client_id: impl Into<String>,
        mutations: Vec<MutationRecord>,
    ) -> Self {
        Self {
            client_view: ClientViewRef::new(client_view),
            client_id: client_id.into(),
            mutations,
        }
    }
}

/// A mutation the domain rejected, ending its batch early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationFailure {
    /// Id of the rejected mutation.
    #[serde(rename = "mutationID")]
    pub mutation_id: u64,
    /// Mutator name.
    pub name: String,
    /// Reason reported by the domain.
    pub message: String,
}

/// Push response from server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Fresh cookie.
    pub cookie: String,
    /// Clients whose ordinal advanced in this batch.
    #[serde(rename = "lastMutationIDChanges", default)]
    pub last_mutation_id_changes: LastMutationIdChanges,
    /// Set when a mutation was rejected and the rest of the batch skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MutationFailure>,
}

impl PushResponse {
    /// Creates a new push response.
    pub fn new(
        cookie: &Cookie,
        last_mutation_id_changes: LastMutationIdChanges,
        error: Option<MutationFailure>,
    ) -> Self {
        Self {
            cookie: cookie.encode(),
            last_mutation_id_changes,
            error,
        }
    }
}

/// Result of an administrative poke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokeResponse {
    /// Number of live streams that received a `sync` signal.
    #[serde(rename = "clientsNotified")]
    pub clients_notified: usize,
}

/// Signal delivered over a live update stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    /// Sent once when the stream opens.
    Connected,
    /// Keep-alive.
    Ping,
    /// New data is available; the client should pull.
    Sync,
}

impl StreamEvent {
    /// Returns the event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected => "connected",
            StreamEvent::Ping => "ping",
            StreamEvent::Sync => "sync",
        }
    }

    /// Returns the JSON payload carried with the event.
    pub fn data(&self) -> String {
        serde_json::json!({ "type": self.name() }).to_string()
    }
}
