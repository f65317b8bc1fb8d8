//! Domain collaborators and the per-view dispatch table.
//!
//! The sync core never touches domain data itself. Each client view is served
//! by one [`DomainCollaborator`] that applies mutations and projects the
//! user's current state as a patch. The [`CollaboratorTable`] is built once at
//! startup and is read-only afterwards.

use async_trait::async_trait;
use daysync_protocol::{ClientView, PatchOp};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a domain collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The mutation violates a business rule.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The mutation references an entity that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Applies mutations and builds patches for one client view.
#[async_trait]
pub trait DomainCollaborator: Send + Sync + fmt::Debug {
    /// Applies one mutation on behalf of `user_id`.
    async fn apply_mutation(
        &self,
        name: &str,
        args: &Value,
        user_id: &str,
    ) -> Result<(), DomainError>;

    /// Returns the operations that bring a client to the user's current state.
    async fn build_patch(&self, user_id: &str) -> Result<Vec<PatchOp>, DomainError>;
}

/// Static mapping from client view to its collaborator.
#[derive(Clone, Default)]
pub struct CollaboratorTable {
    handlers: HashMap<ClientView, Arc<dyn DomainCollaborator>>,
}

impl CollaboratorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the collaborator for `view`, replacing any earlier one.
    pub fn with(mut self, view: ClientView, collaborator: Arc<dyn DomainCollaborator>) -> Self {
        self.handlers.insert(view, collaborator);
        self
    }

    /// Resolves a view by its wire name.
    pub fn resolve(&self, name: &str) -> Option<(ClientView, Arc<dyn DomainCollaborator>)> {
        let view = ClientView::from_name(name)?;
        self.handlers
            .get(&view)
            .map(|collaborator| (view, Arc::clone(collaborator)))
    }

    /// Returns the registered views in a stable order.
    pub fn views(&self) -> Vec<ClientView> {
        let mut views: Vec<_> = self.handlers.keys().copied().collect();
        views.sort();
        views
    }

    /// Returns the number of registered views.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no view is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CollaboratorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaboratorTable")
            .field("views", &self.views())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Nothing;

    #[async_trait]
    impl DomainCollaborator for Nothing {
        async fn apply_mutation(&self, _: &str, _: &Value, _: &str) -> Result<(), DomainError> {
            Ok(())
        }

        async fn build_patch(&self, _: &str) -> Result<Vec<PatchOp>, DomainError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn resolve_registered_view() {
        let table = CollaboratorTable::new().with(ClientView::Diary, Arc::new(Nothing));

        let (view, _) = table.resolve("diary-replicache").unwrap();
        assert_eq!(view, ClientView::Diary);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unregistered_and_unknown_views() {
        let table = CollaboratorTable::new().with(ClientView::Diary, Arc::new(Nothing));

        assert!(table.resolve("ideas-replicache").is_none());
        assert!(table.resolve("unknown-client").is_none());
        assert!(CollaboratorTable::new().is_empty());
    }
}
