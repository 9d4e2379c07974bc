//! Delayed, cancellable daemon shutdown.
//!
//! The daemon exits once no session is connected, but never before a fixed
//! minimum uptime measured from start. Supervisors treat a job that exits
//! sooner as crash-looping and throttle its next launch.
//!
//! ```text
//!            last session closes
//!   Running ─────────────────────▶ ShutdownArmed ──timer fires──▶ Terminated
//!      ▲                                │
//!      └──────── session opens ─────────┘
//! ```

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShutdownArmed,
    Terminated,
}

/// A pending shutdown. Cancelling a fired or cancelled timer is a no-op.
#[derive(Debug)]
pub struct ShutdownTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ShutdownTimer {
    /// Call `on_fire(generation)` after `delay` on the tokio runtime.
    pub fn spawn<F>(delay: Duration, generation: u64, on_fire: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        });
        Self { generation, handle }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Owns the lifecycle state and at most one [`ShutdownTimer`].
#[derive(Debug)]
pub struct Lifecycle {
    started_at: Instant,
    min_uptime: Duration,
    state: LifecycleState,
    timer: Option<ShutdownTimer>,
    next_generation: u64,
}

impl Lifecycle {
    pub fn new(started_at: Instant, min_uptime: Duration) -> Self {
        Self {
            started_at,
            min_uptime,
            state: LifecycleState::Running,
            timer: None,
            next_generation: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == LifecycleState::Terminated
    }

    /// Earliest instant the daemon may exit, or `None` if that lies beyond
    /// the clock's range.
    pub fn deadline(&self) -> Option<Instant> {
        self.started_at.checked_add(self.min_uptime)
    }

    /// Time left until [`deadline`](Self::deadline), zero once passed.
    pub fn shutdown_delay(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.started_at);
        self.min_uptime.saturating_sub(elapsed)
    }

    /// Schedule shutdown (`Running → ShutdownArmed`).
    ///
    /// `on_fire` receives the timer's generation and must hand it back to
    /// [`fire`](Self::fire) from the event loop. Does nothing unless running.
    pub fn arm<F>(&mut self, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if self.state != LifecycleState::Running {
            return;
        }
        let delay = self.shutdown_delay(Instant::now());
        self.next_generation += 1;
        let generation = self.next_generation;

        info!(delay_ms = delay.as_millis() as u64, "No sessions left, shutdown scheduled");
        self.timer = Some(ShutdownTimer::spawn(delay, generation, on_fire));
        self.state = LifecycleState::ShutdownArmed;
    }

    /// Cancel a pending shutdown (`ShutdownArmed → Running`). Idempotent.
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(generation = timer.generation(), "Pending shutdown cancelled");
            timer.cancel();
        }
        if self.state == LifecycleState::ShutdownArmed {
            self.state = LifecycleState::Running;
        }
    }

    /// Handle a timer firing. Returns `true` if the daemon is now terminated.
    ///
    /// A firing from a timer that has since been cancelled is ignored.
    pub fn fire(&mut self, generation: u64) -> bool {
        let current = self.timer.as_ref().map(ShutdownTimer::generation);
        if self.state != LifecycleState::ShutdownArmed || current != Some(generation) {
            debug!(generation, "Ignoring stale shutdown timer");
            return false;
        }
        self.timer = None;
        self.state = LifecycleState::Terminated;
        info!("Minimum uptime reached with no sessions, shutting down");
        true
    }

    /// Terminate immediately, e.g. on a signal.
    pub fn terminate(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.state = LifecycleState::Terminated;
    }
}
