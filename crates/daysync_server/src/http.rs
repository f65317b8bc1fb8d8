//! HTTP surface of the sync server.
//!
//! | Method | Path                          | Body           |
//! |--------|-------------------------------|----------------|
//! | POST   | `/api/v1/replicache/pull`      | `PullRequest`  |
//! | POST   | `/api/v1/replicache/push`      | `PushRequest`  |
//! | GET    | `/api/v1/replicache/stream`    | SSE            |
//! | POST   | `/api/v1/replicache/poke-user` | empty          |
//! | GET    | `/api/v1/replicache/stats`     | empty          |
//! | GET    | `/health`                      | empty          |
//!
//! The caller is identified by `Authorization: Bearer <token>` when auth is
//! enabled, otherwise by the `x-user-id` header.

use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use daysync_protocol::{PokeResponse, PullRequest, PullResponse, PushRequest, PushResponse};
use futures_util::stream::{self, Stream};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Header carrying the user id in development mode.
pub const USER_HEADER: &str = "x-user-id";

/// Builds the router for all sync endpoints.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/api/v1/replicache/pull", post(pull))
        .route("/api/v1/replicache/push", post(push))
        .route("/api/v1/replicache/stream", get(open_stream))
        .route("/api/v1/replicache/poke-user", post(poke_user))
        .route("/api/v1/replicache/stats", get(stats))
        .route("/health", get(health))
        .with_state(server)
}

/// Serves the sync endpoints until `signal` resolves.
///
/// Once the signal fires every stream is closed so in-flight SSE responses
/// end and the graceful shutdown can complete.
pub async fn serve<F>(server: Arc<SyncServer>, listener: TcpListener, signal: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let closing = Arc::clone(&server);
    let shutdown = async move {
        signal.await;
        info!("shutting down");
        closing.shutdown();
    };

    server.start_keep_alive();
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn authenticate(server: &SyncServer, headers: &HeaderMap) -> ServerResult<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let user = headers.get(USER_HEADER).and_then(|value| value.to_str().ok());
    server.authenticate(bearer, user)
}

async fn pull(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    Json(request): Json<PullRequest>,
) -> Result<Json<PullResponse>, ServerError> {
    let user_id = authenticate(&server, &headers)?;
    Ok(Json(server.handle_pull(&user_id, request).await?))
}

async fn push(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, ServerError> {
    let user_id = authenticate(&server, &headers)?;
    Ok(Json(server.handle_push(&user_id, request).await?))
}

async fn poke_user(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
) -> Result<Json<PokeResponse>, ServerError> {
    let user_id = authenticate(&server, &headers)?;
    Ok(Json(server.handle_poke(&user_id)))
}

async fn open_stream(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user_id = authenticate(&server, &headers)?;
    let handle = server.open_stream(&user_id)?;

    // The handle moves into the stream; dropping the response unregisters it.
    let events = stream::unfold(handle, |mut handle| async move {
        let event = handle.recv().await?;
        let sse = Event::default().event(event.name()).data(event.data());
        Some((Ok(sse), handle))
    });
    Ok(Sse::new(events))
}

/// Stream counts for the caller and for the whole server.
async fn stats(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ServerError> {
    let user_id = authenticate(&server, &headers)?;
    let registry = server.registry();
    Ok(Json(json!({
        "userId": user_id,
        "userConnections": registry.user_connection_count(&user_id),
        "totalConnections": registry.connection_count(),
        "activeUsers": registry.user_count(),
    })))
}

async fn health(State(server): State<Arc<SyncServer>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": server.connection_count(),
    }))
}
