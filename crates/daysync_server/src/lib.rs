//! # Daysync Server
//!
//! Real-time sync core for daysync clients.
//!
//! This crate provides:
//! - Pull and push handling with per-client mutation ordinals
//! - Live update streams (server-sent events) that tell clients when to pull
//! - Authentication (HMAC-SHA256 bearer tokens, or a plain user header in
//!   development mode)
//!
//! # Architecture
//!
//! The server holds no domain data of its own. Each client view is backed by
//! a [`DomainCollaborator`] that applies mutations and builds patches; the
//! server keeps:
//! - The last applied mutation id of every (user, client) pair, optionally
//!   persisted through a [`VersionBackend`]
//! - The set of open streams per user
//!
//! A push runs under a per-user lock, applies mutations in ascending id
//! order and advances the client's ordinal. When the ordinal moved, every
//! open stream of that user receives a `sync` signal and pulls.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daysync_server::{http, CollaboratorTable, ServerConfig, SyncServer};
//! use std::sync::Arc;
//!
//! let table = daysync_domains::default_table();
//! let server = Arc::new(SyncServer::new(ServerConfig::default(), table)?);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! http::serve(server, listener, shutdown_signal()).await?;
//! ```
//!
//! # Protocol
//!
//! 1. Client opens a stream and receives `connected`
//! 2. Client pushes mutations; the response carries the new ordinal
//! 3. Every stream of the user receives `sync`
//! 4. Client pulls with its cookie and applies the patch

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod collaborator;
mod config;
mod error;
mod handler;
pub mod http;
mod notify;
mod patch;
mod registry;
mod router;
mod server;
mod version_backend;
mod version_store;

pub use auth::{AuthConfig, Authenticator, TokenValidator};
pub use collaborator::{CollaboratorTable, DomainCollaborator, DomainError};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use notify::NotificationBridge;
pub use patch::{PatchGenerator, PullResult};
pub use registry::{
    CloseReason, ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionState,
    RegistryError,
};
pub use router::{MutationRouter, PushResult};
pub use server::SyncServer;
pub use version_backend::{ClientOrdinals, JsonFileBackend, MemoryBackend, VersionBackend};
pub use version_store::VersionStore;

// Re-export so collaborators need not depend on it directly.
pub use async_trait::async_trait;
