//! Core daemon process: startup, event loop, and shutdown.
//!
//! All mutable daemon state (sessions, watches, the shutdown timer) lives in
//! [`DaemonState`] and is only touched by the event loop. Everything else
//! (IPC handlers, the filesystem watcher thread, timers) posts
//! [`DaemonEvent`]s through a [`DaemonHandle`].

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use wgpilot_config::AppConfig;

use crate::catalog::TunnelCatalog;
use crate::controller::TunnelController;
use crate::hub::{SessionHandle, SessionHub, SessionId, StateChanged, session_channel};
use crate::ipc::server::{self, IpcState};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::watcher::{FileWatcher, NotifySubscriber, PathSubscriber, WatchError};

/// How long to wait for the IPC server to drain after the loop stops.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Messages handled by the daemon event loop.
#[derive(Debug)]
pub enum DaemonEvent {
    SessionOpened {
        id: SessionId,
        handle: SessionHandle,
    },
    SessionClosed {
        id: SessionId,
    },
    /// Raw filesystem event under a watched directory.
    PathChanged {
        path: PathBuf,
    },
    /// A state-change request finished (successfully or not).
    TunnelStateChanged {
        name: String,
        exit_code: i32,
    },
    ShutdownFired {
        generation: u64,
    },
    Terminate,
}

/// Cloneable sender into the event loop.
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    events: mpsc::UnboundedSender<DaemonEvent>,
    next_session: Arc<AtomicU64>,
}

impl DaemonHandle {
    pub fn new(events: mpsc::UnboundedSender<DaemonEvent>) -> Self {
        Self {
            events,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Post an event. Returns `false` once the loop has stopped.
    pub fn send(&self, event: DaemonEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Register a new session with the loop.
    ///
    /// The session lasts until the returned guard is dropped.
    pub fn open_session(&self) -> (SessionGuard, mpsc::Receiver<StateChanged>) {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (handle, rx) = session_channel();
        if !self.send(DaemonEvent::SessionOpened { id, handle }) {
            debug!(session = id, "Session opened after event loop stopped");
        }
        let guard = SessionGuard {
            id,
            events: self.events.clone(),
        };
        (guard, rx)
    }

    pub fn path_changed(&self, path: PathBuf) {
        self.send(DaemonEvent::PathChanged { path });
    }

    pub fn tunnel_state_changed(&self, name: impl Into<String>, exit_code: i32) {
        self.send(DaemonEvent::TunnelStateChanged {
            name: name.into(),
            exit_code,
        });
    }

    pub fn terminate(&self) {
        self.send(DaemonEvent::Terminate);
    }
}

/// Keeps a session registered; dropping it closes the session.
#[derive(Debug)]
pub struct SessionGuard {
    id: SessionId,
    events: mpsc::UnboundedSender<DaemonEvent>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.events.send(DaemonEvent::SessionClosed { id: self.id });
    }
}

/// Single owner of the daemon's mutable state.
pub struct DaemonState<S> {
    hub: SessionHub,
    watcher: FileWatcher<S>,
    lifecycle: Lifecycle,
    handle: DaemonHandle,
}

impl<S: PathSubscriber> DaemonState<S> {
    pub fn new(watcher: FileWatcher<S>, lifecycle: Lifecycle, handle: DaemonHandle) -> Self {
        Self {
            hub: SessionHub::new(),
            watcher,
            lifecycle,
            handle,
        }
    }

    /// Register the initial watches and, with no session yet connected,
    /// arm the shutdown timer.
    pub fn start(&mut self) {
        self.watcher.register_watches();
        if self.hub.is_empty() {
            self.arm_shutdown();
        }
    }

    /// Apply one event. Breaks once the daemon has terminated.
    pub fn handle_event(&mut self, event: DaemonEvent) -> ControlFlow<()> {
        match event {
            DaemonEvent::SessionOpened { id, handle } => self.on_connect(id, handle),
            DaemonEvent::SessionClosed { id } => self.on_disconnect(id),
            DaemonEvent::PathChanged { path } => {
                debug!(path = %path.display(), "Watched path changed");
                self.hub.broadcast_state_changed();
            }
            DaemonEvent::TunnelStateChanged { name, exit_code } => {
                debug!(tunnel = %name, exit_code, "State change attempted, refreshing watches");
                self.watcher.register_watches();
                self.hub.broadcast_state_changed();
            }
            DaemonEvent::ShutdownFired { generation } => {
                self.lifecycle.fire(generation);
            }
            DaemonEvent::Terminate => {
                info!("Termination requested");
                self.lifecycle.terminate();
            }
        }

        if self.lifecycle.is_terminated() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn on_connect(&mut self, id: SessionId, handle: SessionHandle) {
        self.lifecycle.disarm();
        self.hub.on_connect(id, handle);
    }

    fn on_disconnect(&mut self, id: SessionId) {
        if self.hub.on_disconnect(id) == Some(0) {
            self.arm_shutdown();
        }
    }

    fn arm_shutdown(&mut self) {
        let handle = self.handle.clone();
        self.lifecycle.arm(move |generation| {
            handle.send(DaemonEvent::ShutdownFired { generation });
        });
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    pub fn watcher(&self) -> &FileWatcher<S> {
        &self.watcher
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

/// Drive `state` until it terminates or the process receives SIGINT/SIGTERM.
pub async fn run_event_loop<S: PathSubscriber>(
    state: &mut DaemonState<S>,
    events: &mut mpsc::UnboundedReceiver<DaemonEvent>,
) -> Result<(), DaemonError> {
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("All event senders dropped, stopping");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                DaemonEvent::Terminate
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received, initiating graceful shutdown");
                DaemonEvent::Terminate
            }
        };

        if state.handle_event(event).is_break() {
            return Ok(());
        }
    }
}

/// The wgpilot daemon.
pub struct Daemon {
    config: AppConfig,
}

impl Daemon {
    /// Create a new daemon instance with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Get a reference to the daemon's configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Serve clients until the lifecycle terminates.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let started_at = Instant::now();
        let locator = self.config.locator();
        let runtime_dir = PathBuf::from(&self.config.daemon.runtime_dir);
        let socket_path = PathBuf::from(&self.config.daemon.socket_path);

        info!(
            version = %crate::build_info::version_string(),
            socket = %socket_path.display(),
            config_dirs = %locator.search_path(),
            runtime_dir = %runtime_dir.display(),
            state_tool = %locator.state_tool().display(),
            "wgpilot daemon starting"
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = DaemonHandle::new(events_tx);

        let watch_handle = handle.clone();
        let subscriber = NotifySubscriber::new(move |path| watch_handle.path_changed(path))?;
        let watcher = FileWatcher::new(subscriber, locator.config_dirs(), &runtime_dir);
        let lifecycle = Lifecycle::new(
            started_at,
            Duration::from_secs(self.config.daemon.min_uptime_secs),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ipc_state = Arc::new(IpcState {
            catalog: Arc::new(TunnelCatalog::from_locator(&locator, &runtime_dir)),
            controller: Arc::new(TunnelController::new(&locator)),
            daemon: handle.clone(),
            shutdown_tx: shutdown_tx.clone(),
        });

        let listener = server::bind(&socket_path).map_err(|e| {
            DaemonError::Startup(format!("cannot bind {}: {e}", socket_path.display()))
        })?;
        let server_task = tokio::spawn(server::serve(
            listener,
            socket_path.clone(),
            ipc_state,
            shutdown_rx,
        ));

        let mut state = DaemonState::new(watcher, lifecycle, handle);
        state.start();
        let loop_result = run_event_loop(&mut state, &mut events_rx).await;

        let _ = shutdown_tx.send(ShutdownSignal);
        match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "IPC server failed"),
            Ok(Err(e)) => error!(error = %e, "IPC server task panicked"),
            Err(_) => warn!("IPC server did not stop in time"),
        }

        info!("Daemon stopped");
        loop_result
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("filesystem watcher: {0}")]
    Watch(#[from] WatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::error::TryRecvError;
    use wgpilot_test_utils::TunnelTree;

    use crate::watcher::tests::RecordingSubscriber;

    struct Harness {
        state: DaemonState<RecordingSubscriber>,
        handle: DaemonHandle,
        events: mpsc::UnboundedReceiver<DaemonEvent>,
        subscriber: RecordingSubscriber,
    }

    impl Harness {
        fn new(tree: &TunnelTree, min_uptime: Duration) -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let handle = DaemonHandle::new(tx);
            let subscriber = RecordingSubscriber::default();
            let watcher = FileWatcher::new(
                subscriber.clone(),
                &[
                    tree.primary_dir().to_path_buf(),
                    tree.secondary_dir().to_path_buf(),
                ],
                tree.runtime_dir(),
            );
            let state = DaemonState::new(
                watcher,
                Lifecycle::new(Instant::now(), min_uptime),
                handle.clone(),
            );
            Self {
                state,
                handle,
                events,
                subscriber,
            }
        }

        /// Apply every queued event.
        fn pump(&mut self) -> ControlFlow<()> {
            while let Ok(event) = self.events.try_recv() {
                if self.state.handle_event(event).is_break() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        }
    }

    #[tokio::test]
    async fn test_start_registers_watches_and_arms() {
        let tree = TunnelTree::new();
        let mut h = Harness::new(&tree, Duration::from_secs(10));

        h.state.start();
        assert_eq!(h.state.watcher().watched().len(), 3);
        assert_eq!(h.state.lifecycle_state(), LifecycleState::ShutdownArmed);
    }

    #[tokio::test]
    async fn test_session_guard_drop_closes_session() {
        let tree = TunnelTree::new();
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        h.state.start();

        let (guard, _rx) = h.handle.open_session();
        let _ = h.pump();
        assert_eq!(h.state.hub().len(), 1);
        assert_eq!(h.state.lifecycle_state(), LifecycleState::Running);

        drop(guard);
        let _ = h.pump();
        assert!(h.state.hub().is_empty());
        assert_eq!(h.state.lifecycle_state(), LifecycleState::ShutdownArmed);
    }

    #[tokio::test]
    async fn test_path_change_notifies_all_sessions() {
        let tree = TunnelTree::new();
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        h.state.start();

        let (_g1, mut rx1) = h.handle.open_session();
        let (_g2, mut rx2) = h.handle.open_session();
        h.handle.path_changed(tree.runtime_dir().join("home.name"));
        h.handle.path_changed(tree.runtime_dir().join("home.name"));
        let _ = h.pump();

        // No debounce: one notification per event.
        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.try_recv(), Ok(StateChanged));
            assert_eq!(rx.try_recv(), Ok(StateChanged));
            assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        }
    }

    #[tokio::test]
    async fn test_set_tunnel_state_broadcasts_exactly_once() {
        let tree = TunnelTree::new();
        tree.install_stub_tool(0);
        let controller = TunnelController::new(&tree.config().locator());
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        h.state.start();

        let (_g1, mut rx1) = h.handle.open_session();
        let (_g2, mut rx2) = h.handle.open_session();
        let _ = h.pump();

        let code = controller.set_tunnel_state("home", true).await;
        assert_eq!(code, 0);
        h.handle.tunnel_state_changed("home", code);
        let _ = h.pump();

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.try_recv(), Ok(StateChanged));
            assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        }
    }

    #[tokio::test]
    async fn test_state_change_rescans_new_directories() {
        let tree = TunnelTree::without_dirs();
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        h.state.start();
        assert!(h.subscriber.calls().is_empty());

        // The tool creates the runtime directory on first `up`.
        std::fs::create_dir_all(tree.runtime_dir()).unwrap();
        h.handle.tunnel_state_changed("home", 1);
        let _ = h.pump();

        assert_eq!(h.subscriber.calls(), vec![tree.runtime_dir().to_path_buf()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_termination_before_min_uptime() {
        let tree = TunnelTree::new();
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        h.state.start();

        let sessions: Vec<_> = (0..3).map(|_| h.handle.open_session()).collect();
        assert!(h.pump().is_continue());
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(sessions);
        assert!(h.pump().is_continue());
        assert_eq!(h.state.lifecycle_state(), LifecycleState::ShutdownArmed);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(h.pump().is_continue());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.pump().is_break());
        assert_eq!(h.state.lifecycle_state(), LifecycleState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_before_deadline_prevents_termination() {
        let tree = TunnelTree::new();
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        h.state.start();

        let first = h.handle.open_session();
        let _ = h.pump();
        drop(first);
        let _ = h.pump();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let second = h.handle.open_session();
        assert!(h.pump().is_continue());
        assert_eq!(h.state.lifecycle_state(), LifecycleState::Running);

        // Well past the deadline while a session is connected.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.pump().is_continue());

        // Deadline already passed: the next disconnect terminates promptly.
        drop(second);
        assert!(h.pump().is_continue());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(h.pump().is_break());
    }

    #[tokio::test]
    async fn test_terminate_event_breaks() {
        let tree = TunnelTree::new();
        let mut h = Harness::new(&tree, Duration::from_secs(10));
        let (_guard, _rx) = h.handle.open_session();
        h.handle.terminate();
        assert!(h.pump().is_break());
    }
}
