//! Main sync server.

use crate::auth::{AuthConfig, Authenticator, TokenValidator};
use crate::collaborator::CollaboratorTable;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::version_backend::JsonFileBackend;
use crate::version_store::VersionStore;
use daysync_protocol::{PokeResponse, PullRequest, PullResponse, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// The sync server.
///
/// Owns every piece of shared state: the version store, the connection
/// registry and the collaborator table. Construct it once at startup and
/// share it behind an `Arc`.
///
/// # Example
///
/// ```
/// use daysync_server::{CollaboratorTable, ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default(), CollaboratorTable::new()).unwrap();
/// assert_eq!(server.connection_count(), 0);
///
/// // Expose it over HTTP with `daysync_server::http::router`, or call
/// // handle_pull(), handle_push() and open_stream() directly.
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig, collaborators: CollaboratorTable) -> ServerResult<Self> {
        let authenticator = if config.require_auth {
            let secret = config
                .auth_secret
                .clone()
                .filter(|secret| !secret.is_empty())
                .ok_or_else(|| ServerError::InvalidRequest("auth enabled without a secret".into()))?;
            Authenticator::Tokens(TokenValidator::new(
                AuthConfig::new(secret).with_expiry(config.token_expiry),
            ))
        } else {
            Authenticator::Disabled
        };

        let versions = match &config.state_path {
            Some(path) => VersionStore::with_backend(Arc::new(JsonFileBackend::open(path)?))?,
            None => VersionStore::new(),
        };

        info!(
            views = ?collaborators.views(),
            require_auth = config.require_auth,
            durable = versions.is_durable(),
            "sync server created"
        );

        let context = Arc::new(HandlerContext::new(config, authenticator, Arc::new(versions)));
        let handler = RequestHandler::new(Arc::clone(&context), collaborators);

        Ok(Self {
            handler,
            context,
            keep_alive: Mutex::new(None),
        })
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Resolves the calling user. Must succeed before any other call.
    pub fn authenticate(&self, bearer: Option<&str>, user_header: Option<&str>) -> ServerResult<String> {
        self.context.authenticator.resolve_user(bearer, user_header)
    }

    /// Handles a pull request.
    pub async fn handle_pull(&self, user_id: &str, request: PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(user_id, request).await
    }

    /// Handles a push request.
    pub async fn handle_push(&self, user_id: &str, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(user_id, request).await
    }

    /// Wakes every stream of a user.
    pub fn handle_poke(&self, user_id: &str) -> PokeResponse {
        self.handler.handle_poke(user_id)
    }

    /// Opens a live update stream.
    pub fn open_stream(&self, user_id: &str) -> ServerResult<ConnectionHandle> {
        self.handler.open_stream(user_id)
    }

    /// Starts the keep-alive task. Must be called from within a Tokio runtime.
    ///
    /// Calling it again restarts the task.
    pub fn start_keep_alive(&self) {
        let interval = self.context.config.keep_alive_interval;
        let task = self.context.registry.spawn_keep_alive(interval);
        if let Some(previous) = self.keep_alive.lock().replace(task) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "keep-alive started");
    }

    /// Stops the keep-alive task and closes every stream.
    pub fn shutdown(&self) {
        if let Some(task) = self.keep_alive.lock().take() {
            task.abort();
        }
        self.context.registry.shutdown();
    }

    /// Returns the last applied mutation id of a client.
    pub fn last_mutation_id(&self, user_id: &str, client_id: &str) -> u64 {
        self.context.versions.last_mutation_id(user_id, client_id)
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.context.registry
    }

    /// Returns the number of open streams.
    pub fn connection_count(&self) -> usize {
        self.context.registry.connection_count()
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        if let Some(task) = self.keep_alive.get_mut().take() {
            task.abort();
        }
    }
}
