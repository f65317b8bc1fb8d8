//! The opaque version token exchanged on every pull and push.
//!
//! ## Wire Format
//!
//! A cookie travels as a JSON object serialized to a string:
//!
//! ```text
//! {"lastMutationID":3,"userID":"u1","clientID":"c1","clientView":"todo-replicache-flat","ts":1700000000000}
//! ```
//!
//! Clients must treat the string as opaque and hand it back unchanged.
//! The `ts` field is only there to make cookies easier to read in logs;
//! it never takes part in equality.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Version token for one (user, client, client view).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    /// Last mutation id the server applied for this client.
    #[serde(rename = "lastMutationID")]
    pub last_mutation_id: u64,
    /// Owning user.
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Client (browser tab / device) the cookie was minted for.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Client view wire name.
    #[serde(rename = "clientView")]
    pub client_view: String,
    /// Minting time in Unix milliseconds.
    #[serde(rename = "ts")]
    pub timestamp_ms: u64,
}

impl Cookie {
    /// Creates a cookie stamped with the current time.
    pub fn new(
        last_mutation_id: u64,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        client_view: impl Into<String>,
    ) -> Self {
        Self {
            last_mutation_id,
            user_id: user_id.into(),
            client_id: client_id.into(),
            client_view: client_view.into(),
            timestamp_ms: now_millis(),
        }
    }

    /// Returns true if both cookies were minted for the same user, client and view.
    pub fn same_owner(&self, other: &Cookie) -> bool {
        self.user_id == other.user_id
            && self.client_id == other.client_id
            && self.client_view == other.client_view
    }

    /// Encodes the cookie into its opaque wire string.
    pub fn encode(&self) -> String {
        // Strings and integers only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decodes a cookie from its wire string.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        if raw.trim().is_empty() {
            return Err(ProtocolError::InvalidCookie("empty cookie".into()));
        }
        serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidCookie(e.to_string()))
    }
}

impl PartialEq for Cookie {
    fn eq(&self, other: &Self) -> bool {
        self.last_mutation_id == other.last_mutation_id && self.same_owner(other)
    }
}

impl Eq for Cookie {}

/// Current wall-clock time in Unix milliseconds; 0 if the clock is before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
