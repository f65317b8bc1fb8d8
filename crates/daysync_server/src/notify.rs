//! Wakes a user's live streams after their data changed.

use crate::registry::ConnectionRegistry;
use tracing::{debug, warn};

/// Bridge from committed pushes to the connection registry.
///
/// A missed wake is recoverable (clients also pull on their own schedule),
/// so nothing here is ever reported back to the pushing request.
#[derive(Clone)]
pub struct NotificationBridge {
    registry: ConnectionRegistry,
}

impl NotificationBridge {
    /// Creates a bridge over `registry`.
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Tells every open stream of `user_id` to pull. Never fails.
    pub fn notify(&self, user_id: &str) {
        match self.registry.try_wake(user_id) {
            Ok(notified) => debug!(user_id, notified, "sync notification sent"),
            Err(e) => warn!(user_id, error = %e, "sync notification dropped"),
        }
    }

    /// Returns the underlying registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daysync_protocol::StreamEvent;

    #[test]
    fn notify_wakes_only_that_user() {
        let registry = ConnectionRegistry::new(4);
        let bridge = NotificationBridge::new(registry.clone());
        let mut mine = registry.register("u1").unwrap();
        let mut other = registry.register("u2").unwrap();

        bridge.notify("u1");

        assert_eq!(mine.try_recv(), Some(StreamEvent::Connected));
        assert_eq!(mine.try_recv(), Some(StreamEvent::Sync));
        assert_eq!(other.try_recv(), Some(StreamEvent::Connected));
        assert_eq!(other.try_recv(), None);
    }

    #[test]
    fn notify_swallows_registry_failures() {
        let registry = ConnectionRegistry::new(4);
        let bridge = NotificationBridge::new(registry.clone());
        registry.shutdown();

        // Must not panic or surface the error.
        bridge.notify("u1");
        assert!(bridge.registry().is_shut_down());
    }
}
