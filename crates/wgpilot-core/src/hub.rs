//! Live client sessions and state-changed fan-out.
//!
//! Each session is represented by the sending half of a bounded channel
//! whose receiver feeds the client's event stream. Delivery is best effort
//! and isolated per session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Identifier assigned to a session when it opens.
pub type SessionId = u64;

/// Notifications a session can queue before deliveries are dropped.
pub const SESSION_QUEUE_DEPTH: usize = 16;

/// "Tunnel state may have changed; re-query the tunnel list."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanged;

/// Sending half of a session's notification queue.
pub type SessionHandle = mpsc::Sender<StateChanged>;

/// Create the queue for a new session.
pub fn session_channel() -> (SessionHandle, mpsc::Receiver<StateChanged>) {
    mpsc::channel(SESSION_QUEUE_DEPTH)
}

/// Outcome of one broadcast, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of connected sessions.
#[derive(Debug, Default)]
pub struct SessionHub {
    sessions: BTreeMap<SessionId, SessionHandle>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns the live session count.
    pub fn on_connect(&mut self, id: SessionId, handle: SessionHandle) -> usize {
        self.sessions.insert(id, handle);
        debug!(session = id, live = self.sessions.len(), "Session opened");
        self.sessions.len()
    }

    /// Forget a session. Returns the live session count, or `None` if the
    /// session was unknown.
    pub fn on_disconnect(&mut self, id: SessionId) -> Option<usize> {
        self.sessions.remove(&id)?;
        debug!(session = id, live = self.sessions.len(), "Session closed");
        Some(self.sessions.len())
    }

    /// Push [`StateChanged`] to every session.
    ///
    /// A session that cannot take the notification is logged and skipped;
    /// the remaining sessions still receive it.
    pub fn broadcast_state_changed(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (id, handle) in &self.sessions {
            match handle.try_send(StateChanged) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(session = id, "Session queue full, dropping notification");
                    report.failed += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = id, "Session endpoint gone, skipping notification");
                    report.failed += 1;
                }
            }
        }
        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast state changed"
        );
        report
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connect_and_disconnect_counts() {
        let mut hub = SessionHub::new();
        let (a, _ra) = session_channel();
        let (b, _rb) = session_channel();

        assert_eq!(hub.on_connect(1, a), 1);
        assert_eq!(hub.on_connect(2, b), 2);
        assert_eq!(hub.on_disconnect(1), Some(1));
        assert_eq!(hub.on_disconnect(1), None);
        assert_eq!(hub.on_disconnect(2), Some(0));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_session() {
        let mut hub = SessionHub::new();
        let (a, mut ra) = session_channel();
        let (b, mut rb) = session_channel();
        hub.on_connect(1, a);
        hub.on_connect(2, b);

        let report = hub.broadcast_state_changed();
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert_eq!(ra.try_recv(), Ok(StateChanged));
        assert_eq!(rb.try_recv(), Ok(StateChanged));
    }

    #[test_log::test]
    fn test_dead_session_does_not_block_others() {
        let mut hub = SessionHub::new();
        let (dead, dead_rx) = session_channel();
        let (live, mut live_rx) = session_channel();
        hub.on_connect(1, dead);
        hub.on_connect(2, live);
        drop(dead_rx);

        let report = hub.broadcast_state_changed();
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(live_rx.try_recv(), Ok(StateChanged));
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_full_queue_is_skipped() {
        let mut hub = SessionHub::new();
        let (slow, _slow_rx) = session_channel();
        let (fast, mut fast_rx) = session_channel();
        hub.on_connect(1, slow);
        hub.on_connect(2, fast);

        for _ in 0..SESSION_QUEUE_DEPTH {
            hub.broadcast_state_changed();
            fast_rx.try_recv().unwrap();
        }
        let report = hub.broadcast_state_changed();
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(fast_rx.try_recv(), Ok(StateChanged));
    }

    #[test]
    fn test_broadcast_with_no_sessions() {
        let hub = SessionHub::new();
        assert_eq!(hub.broadcast_state_changed(), BroadcastReport::default());
    }
}
