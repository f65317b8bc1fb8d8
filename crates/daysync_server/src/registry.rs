//! Live update connections, grouped by user.
//!
//! Every open stream owns a bounded queue. The registry keeps the sending
//! half, keyed by user, and the stream keeps the [`ConnectionHandle`] with the
//! receiving half. Signals are pushed with `try_send`, so a stalled client can
//! never block delivery to anyone else.
//!
//! ## Locking
//!
//! The outer map is an `RwLock` and each user's set has its own `Mutex`.
//! Adding or removing sinks takes the outer write lock and then the user lock;
//! waking a user takes the outer read lock only long enough to clone that
//! user's set handle. Waking user A never waits on user B.

use daysync_protocol::StreamEvent;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Identifier of one live connection.
pub type ConnectionId = Uuid;

/// Errors raised by the connection registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry no longer accepts connections or delivers signals.
    #[error("connection registry is shut down")]
    ShutDown,

    /// A sink was closed when a signal was pushed to it.
    #[error("delivery to connection {0} failed")]
    DeliveryFailure(ConnectionId),
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client went away or the server shut the stream down.
    Normal,
    /// The stream failed.
    Error,
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, `connected` not yet queued.
    Connecting,
    /// Receiving signals.
    Open,
    /// Deregistered.
    Closed(CloseReason),
}

impl ConnectionState {
    /// Returns true for terminal states.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

type UserSinks = HashMap<ConnectionId, mpsc::Sender<StreamEvent>>;

struct RegistryInner {
    users: RwLock<HashMap<String, Arc<Mutex<UserSinks>>>>,
    queue_capacity: usize,
    shut_down: AtomicBool,
}

impl RegistryInner {
    /// Removes the given connections of one user, dropping empty user sets.
    fn remove(&self, user_id: &str, ids: &[ConnectionId]) -> usize {
        let mut users = self.users.write();
        let Some(sinks) = users.get(user_id) else {
            return 0;
        };

        let (removed, now_empty) = {
            let mut sinks = sinks.lock();
            let removed = ids.iter().filter(|id| sinks.remove(id).is_some()).count();
            (removed, sinks.is_empty())
        };
        if now_empty {
            users.remove(user_id);
        }
        removed
    }

    /// Pushes `event` to every sink of one user, returning delivered ids and closed ids.
    fn deliver(&self, sinks: &Mutex<UserSinks>, event: StreamEvent) -> (usize, Vec<ConnectionId>) {
        let sinks = sinks.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, sender) in sinks.iter() {
            // A ping only goes into an empty queue, so it can never crowd out a sync.
            let busy = sender.capacity() < sender.max_capacity();
            if event == StreamEvent::Ping && busy && !sender.is_closed() {
                trace!(connection_id = %id, "stream has pending signals, ping skipped");
                continue;
            }
            match sender.try_send(event) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    // With pings kept out of busy queues, a full queue already
                    // holds a `sync` or `connected` and the client will pull.
                    trace!(connection_id = %id, event = event.name(), "stream queue full, signal dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        connection_id = %id,
                        error = %RegistryError::DeliveryFailure(*id),
                        "stream closed, unregistering"
                    );
                    closed.push(*id);
                }
            }
        }
        (delivered, closed)
    }
}

/// Registry of open live update streams.
///
/// Cloning is cheap; all clones share the same connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates a registry whose streams buffer at most `queue_capacity`
    /// signals (at least 2).
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                users: RwLock::new(HashMap::new()),
                queue_capacity: queue_capacity.max(2),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Opens a new connection for `user_id`.
    ///
    /// The returned handle already holds a `connected` signal.
    pub fn register(&self, user_id: &str) -> Result<ConnectionHandle, RegistryError> {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }

        let (sender, receiver) = mpsc::channel(self.inner.queue_capacity);
        let mut handle = ConnectionHandle {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            receiver,
            state: ConnectionState::Connecting,
            registry: Arc::downgrade(&self.inner),
        };

        // Fresh channel with capacity >= 2, this cannot fail.
        let _ = sender.try_send(StreamEvent::Connected);

        {
            let mut users = self.inner.users.write();
            // Re-check under the lock so shutdown cannot race a registration.
            if self.is_shut_down() {
                return Err(RegistryError::ShutDown);
            }
            users
                .entry(user_id.to_string())
                .or_default()
                .lock()
                .insert(handle.id, sender);
        }

        handle.state = ConnectionState::Open;
        info!(user_id, connection_id = %handle.id, "stream opened");
        Ok(handle)
    }

    /// Removes a connection. Safe to call more than once.
    ///
    /// Returns true if the connection was still registered.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        self.unregister_id(&handle.user_id, handle.id)
    }

    /// Removes a connection by id. Safe to call more than once.
    pub fn unregister_id(&self, user_id: &str, id: ConnectionId) -> bool {
        let removed = self.inner.remove(user_id, &[id]) > 0;
        if removed {
            info!(user_id, connection_id = %id, "stream closed");
        }
        removed
    }

    /// Signals every stream of `user_id` to pull.
    ///
    /// Returns the number of streams that accepted the signal; 0 when the user
    /// has none open. Streams of other users are never touched.
    pub fn wake(&self, user_id: &str) -> usize {
        self.try_wake(user_id).unwrap_or(0)
    }

    /// Like [`wake`](Self::wake) but reports a shut down registry.
    pub fn try_wake(&self, user_id: &str) -> Result<usize, RegistryError> {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }

        let Some(sinks) = self.inner.users.read().get(user_id).cloned() else {
            return Ok(0);
        };
        let (delivered, closed) = self.inner.deliver(&sinks, StreamEvent::Sync);
        if !closed.is_empty() {
            self.inner.remove(user_id, &closed);
        }

        debug!(user_id, delivered, dropped = closed.len(), "woke user streams");
        Ok(delivered)
    }

    /// Sends a `ping` to every open stream of every user.
    ///
    /// Streams with signals still queued are skipped. Closed streams are
    /// unregistered; delivery to the others continues. Returns the number of
    /// streams pinged.
    pub fn keep_alive(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }

        let snapshot: Vec<(String, Arc<Mutex<UserSinks>>)> = self
            .inner
            .users
            .read()
            .iter()
            .map(|(user, sinks)| (user.clone(), Arc::clone(sinks)))
            .collect();

        let mut total = 0;
        for (user_id, sinks) in snapshot {
            let (delivered, closed) = self.inner.deliver(&sinks, StreamEvent::Ping);
            total += delivered;
            if !closed.is_empty() {
                self.inner.remove(&user_id, &closed);
            }
        }
        trace!(streams = total, "keep-alive sent");
        total
    }

    /// Spawns a task that calls [`keep_alive`](Self::keep_alive) every `interval`.
    ///
    /// The task ends once the registry is shut down.
    pub fn spawn_keep_alive(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; streams were just greeted.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if registry.is_shut_down() {
                    break;
                }
                registry.keep_alive();
            }
            debug!("keep-alive task stopped");
        })
    }

    /// Closes every stream and refuses further registrations.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.inner.users.write());
        let closed: usize = drained.values().map(|sinks| sinks.lock().len()).sum();
        info!(closed, "connection registry shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Returns the number of open streams across all users.
    pub fn connection_count(&self) -> usize {
        self.inner
            .users
            .read()
            .values()
            .map(|sinks| sinks.lock().len())
            .sum()
    }

    /// Returns the number of open streams for one user.
    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.inner
            .users
            .read()
            .get(user_id)
            .map_or(0, |sinks| sinks.lock().len())
    }

    /// Returns the number of users with at least one open stream.
    pub fn user_count(&self) -> usize {
        self.inner.users.read().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Receiving side of one live stream.
///
/// Dropping the handle unregisters the connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: String,
    receiver: mpsc::Receiver<StreamEvent>,
    state: ConnectionState,
    registry: Weak<RegistryInner>,
}

impl ConnectionHandle {
    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the owning user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Waits for the next signal. Returns `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.state.is_closed() {
            return None;
        }
        let event = self.receiver.recv().await;
        if event.is_none() {
            self.state = ConnectionState::Closed(CloseReason::Normal);
        }
        event
    }

    /// Returns a queued signal without waiting.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.receiver.try_recv().ok()
    }

    /// Closes the connection and unregisters it.
    pub fn close(&mut self, reason: CloseReason) {
        if self.state.is_closed() {
            return;
        }
        self.state = ConnectionState::Closed(reason);
        self.receiver.close();
        if let Some(inner) = self.registry.upgrade() {
            if inner.remove(&self.user_id, &[self.id]) > 0 {
                info!(user_id = %self.user_id, connection_id = %self.id, ?reason, "stream closed");
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close(CloseReason::Normal);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state)
            .finish()
    }
}
