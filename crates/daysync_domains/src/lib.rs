//! # Daysync Domains
//!
//! In-memory domain collaborators for the four daysync client views:
//!
//! | View                      | Collaborator                   | Keys                               |
//! |---------------------------|--------------------------------|------------------------------------|
//! | `todo-replicache-flat`    | [`TodoDomain`]                 | `list/`, `task/`, `item/`          |
//! | `food-tracker-replicache` | [`EntityDomain::food_tracker`] | `food-entry/`                      |
//! | `diary-replicache`        | [`EntityDomain::diary`]        | `diary-entry/`                     |
//! | `ideas-replicache`        | [`EntityDomain::ideas`]        | `idea/`                            |
//!
//! Deleted entities leave a tombstone so a full-state patch can tell
//! clients to drop them.
//!
//! ```rust,ignore
//! use daysync_server::{ServerConfig, SyncServer};
//!
//! let server = SyncServer::new(ServerConfig::default(), daysync_domains::default_table())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod entity;
mod store;
mod todo;

pub use entity::{EntityDomain, EntitySchema, Field, FieldDefault, DIARY_ENTRY, FOOD_ENTRY, IDEA};
pub use store::{EntityStore, UserEntities};
pub use todo::{ListKind, TodoDomain};

use daysync_protocol::ClientView;
use daysync_server::CollaboratorTable;
use std::sync::Arc;

/// Builds a table with a fresh in-memory collaborator for every client view.
pub fn default_table() -> CollaboratorTable {
    CollaboratorTable::new()
        .with(ClientView::Todo, Arc::new(TodoDomain::new()))
        .with(ClientView::FoodTracker, Arc::new(EntityDomain::food_tracker()))
        .with(ClientView::Diary, Arc::new(EntityDomain::diary()))
        .with(ClientView::Ideas, Arc::new(EntityDomain::ideas()))
}
