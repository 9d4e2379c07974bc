//! IPC server: axum HTTP router over a Unix domain socket.
//!
//! Request/reply calls are served directly from the catalog and controller.
//! `GET /events` opens a session with the daemon event loop and streams
//! `state_changed` notifications until the client goes away.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::{get, post};
use futures::{Stream, StreamExt};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::types::*;
use crate::catalog::{TunnelCatalog, TunnelMap};
use crate::controller::{TOOL_TERMINATED, TunnelController};
use crate::daemon::{DaemonHandle, SessionGuard, ShutdownSignal};
use crate::hub::StateChanged;

/// Shared state accessible to all IPC route handlers.
pub struct IpcState {
    pub catalog: Arc<TunnelCatalog>,
    pub controller: Arc<TunnelController>,
    pub daemon: DaemonHandle,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

/// Build the axum router with all IPC routes.
pub fn router(state: Arc<IpcState>) -> axum::Router {
    axum::Router::new()
        .route("/version", get(handle_version))
        .route("/tunnels", get(handle_list_tunnels))
        .route("/tunnels/{name}/state", post(handle_set_state))
        .route("/events", get(handle_events))
        .fallback(handle_not_found)
        .with_state(state)
}

/// Bind the daemon socket, replacing a stale socket file.
pub fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");
    Ok(listener)
}

/// Serve `listener` until a shutdown signal arrives, then remove the socket.
pub async fn serve(
    listener: UnixListener,
    socket_path: PathBuf,
    state: Arc<IpcState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> std::io::Result<()> {
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("IPC server shutting down");
        })
        .await?;

    std::fs::remove_file(&socket_path).ok();
    Ok(())
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: crate::build_info::version_string(),
    })
}

async fn handle_list_tunnels(State(state): State<Arc<IpcState>>) -> Json<TunnelsResponse> {
    let catalog = Arc::clone(&state.catalog);
    let tunnels = tokio::task::spawn_blocking(move || catalog.list_tunnels())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Tunnel listing task failed");
            TunnelMap::new()
        });
    debug!(count = tunnels.len(), "Listed tunnels");
    Json(TunnelsResponse { tunnels })
}

async fn handle_set_state(
    State(state): State<Arc<IpcState>>,
    UrlPath(name): UrlPath<String>,
    Json(req): Json<SetStateRequest>,
) -> Json<SetStateResponse> {
    // Detached so the re-scan notice is posted even if the client goes away
    // while the tool is still running. Sent on failure too.
    let controller = Arc::clone(&state.controller);
    let daemon = state.daemon.clone();
    let task = tokio::spawn(async move {
        let exit_code = controller.set_tunnel_state(&name, req.enable).await;
        daemon.tunnel_state_changed(name, exit_code);
        exit_code
    });

    let exit_code = task.await.unwrap_or_else(|e| {
        warn!(error = %e, "State change task failed");
        TOOL_TERMINATED
    });
    Json(SetStateResponse { exit_code })
}

async fn handle_events(
    State(state): State<Arc<IpcState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let (guard, rx) = state.daemon.open_session();
    debug!(session = guard.id(), "Event stream opened");

    let stream = SessionStream { guard, rx }.take_until(async move {
        let _ = shutdown_rx.recv().await;
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn handle_not_found() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "no such route".to_string(),
        }),
    )
}

/// SSE body for one session. Dropping it closes the session.
struct SessionStream {
    guard: SessionGuard,
    rx: mpsc::Receiver<StateChanged>,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|next| {
            next.map(|StateChanged| Ok(Event::default().event(STATE_CHANGED_EVENT)))
        })
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        debug!(session = self.guard.id(), "Event stream closed");
    }
}
