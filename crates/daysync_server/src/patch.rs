//! Pull handling: patch and cookie assembly.

use crate::collaborator::CollaboratorTable;
use crate::error::{ServerError, ServerResult};
use crate::version_store::VersionStore;
use daysync_protocol::{Cookie, LastMutationIdChanges, PatchOp, PullResponse};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult {
    /// Cookie reflecting the client's current ordinal.
    pub cookie: Cookie,
    /// Present iff the ordinal differs from the one in the client's cookie.
    pub last_mutation_id_changes: LastMutationIdChanges,
    /// Operations that bring the client to the current state.
    pub patch: Vec<PatchOp>,
}

impl PullResult {
    /// Converts into the wire response.
    pub fn into_response(self) -> PullResponse {
        PullResponse::new(&self.cookie, self.last_mutation_id_changes, self.patch)
    }
}

/// Builds pull responses. Never changes mutation state.
pub struct PatchGenerator {
    collaborators: CollaboratorTable,
    versions: Arc<VersionStore>,
}

impl PatchGenerator {
    /// Creates a new patch generator.
    pub fn new(collaborators: CollaboratorTable, versions: Arc<VersionStore>) -> Self {
        Self {
            collaborators,
            versions,
        }
    }

    /// Produces the patch and cookie for one client.
    ///
    /// A cookie minted for a different user, client or view is ignored and
    /// the client is treated as having none.
    pub async fn pull(
        &self,
        user_id: &str,
        view_name: &str,
        client_id: &str,
        client_cookie: Option<Cookie>,
    ) -> ServerResult<PullResult> {
        let (view, collaborator) = self
            .collaborators
            .resolve(view_name)
            .ok_or_else(|| ServerError::UnknownClientView(view_name.to_string()))?;

        let patch = collaborator.build_patch(user_id).await?;
        let cookie = self.versions.make_cookie(user_id, client_id, view);

        let previous = match client_cookie {
            Some(supplied) if supplied.same_owner(&cookie) => Some(supplied.last_mutation_id),
            Some(supplied) => {
                warn!(
                    user_id,
                    client_id,
                    %view,
                    cookie_user = %supplied.user_id,
                    cookie_client = %supplied.client_id,
                    "ignoring cookie minted for another owner"
                );
                None
            }
            None => None,
        };

        let mut changes = LastMutationIdChanges::new();
        if previous.unwrap_or(0) != cookie.last_mutation_id {
            changes.insert(client_id.to_string(), cookie.last_mutation_id);
        }

        debug!(
            user_id,
            client_id,
            %view,
            ops = patch.len(),
            last_mutation_id = cookie.last_mutation_id,
            "pull served"
        );

        Ok(PullResult {
            cookie,
            last_mutation_id_changes: changes,
            patch,
        })
    }
}
