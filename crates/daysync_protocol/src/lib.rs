//! # daysync Sync Protocol
//!
//! Wire types for the daysync pull/push replication protocol.
//!
//! This crate provides:
//! - [`Cookie`], the opaque version token handed to clients
//! - [`MutationRecord`] for client-originated changes
//! - [`PatchOp`] for server-to-client upserts and deletes
//! - [`ClientView`], the static table of supported client views
//! - Request/response messages for pull, push, poke and the live stream
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client_view;
mod cookie;
mod error;
mod messages;
mod mutation;
mod patch;

pub use client_view::ClientView;
pub use cookie::{now_millis, Cookie};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ClientViewRef, LastMutationIdChanges, MutationFailure, PokeResponse, PullRequest,
    PullResponse, PushRequest, PushResponse, StreamEvent,
};
pub use mutation::MutationRecord;
pub use patch::PatchOp;
