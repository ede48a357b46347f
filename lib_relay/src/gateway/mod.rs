//! # WebSocket Gateway
//!
//! The public face of the relay: an axum router with the `/ws` push endpoint,
//! `/health` and `/status` probes, and the subscriber UI's static assets as
//! fallback. CORS accepts any origin.
//!
//! ## Connection lifecycle:
//! 1.  **Attach**: the subscriber is registered and, if something is on
//!     screen, the current slide is queued as its first payload.
//! 2.  **Pump**: queued payloads are written to the socket; inbound frames are
//!     read and discarded.
//! 3.  **Close**: the first terminal event (client close, read error, failed or
//!     stalled write, or the dispatcher dropping the channel) ends the loop.
//!     The subscriber is detached and the socket closed exactly once.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::core::dispatcher::Subscription;
use crate::core::relay::Relay;
use crate::core::source_health::{SourceHealth, SourceStatus};

/// A write that takes longer than this counts as a failed send.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// # Application State
///
/// Shared by every route. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Current content and subscribers.
    pub relay: Arc<Relay>,
    /// Upstream connectivity, written by the poller.
    pub health: Arc<SourceHealth>,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Upstream connectivity.
    pub source: SourceStatus,
    /// Live subscriber count.
    pub subscribers: usize,
    /// Type tag of the slide on screen.
    pub content_type: String,
    /// Header of the slide on screen.
    pub header: String,
    /// Number of lines on screen.
    pub lines: usize,
}

impl AppState {
    /// Builds the `/status` body.
    pub fn status_report(&self) -> StatusReport {
        let current = self.relay.current();
        StatusReport {
            source: self.health.snapshot(),
            subscribers: self.relay.subscriber_count(),
            content_type: current.type_tag,
            header: current.header,
            lines: current.lines.len(),
        }
    }
}

/// Builds the router. Static assets are served from `public_dir` when given.
pub fn router(state: AppState, public_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let routes = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    let routes = match public_dir {
        Some(dir) => routes.fallback_service(ServeDir::new(dir)),
        None => routes,
    };

    routes.layer(cors).with_state(state)
}

/// Serves `app` on `listener` until `shutdown` resolves. Peer addresses are
/// made available to the handlers.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.status_report())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay, addr))
}

/// # WebSocket Connection Logic
///
/// Runs one subscriber from registration to close.
pub async fn handle_socket(socket: WebSocket, relay: Arc<Relay>, remote_addr: SocketAddr) {
    let Subscription { id, mut receiver, .. } = relay.attach(remote_addr);
    info!("New connection: {} (subscriber {})", remote_addr, id);

    let (mut sink, mut stream) = socket.split();

    let reason = loop {
        tokio::select! {
            outgoing = receiver.recv() => {
                let Some(payload) = outgoing else {
                    break "dropped by dispatcher";
                };
                match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(payload.to_string().into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Failed to send to {}: {}", remote_addr, e);
                        break "send failed";
                    }
                    Err(_) => {
                        warn!("Send to {} stalled for {:?}", remote_addr, SEND_TIMEOUT);
                        break "send timed out";
                    }
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break "closed by client",
                Some(Ok(_)) => debug!("discarding inbound frame from {}", remote_addr),
                Some(Err(e)) => {
                    debug!("Read error from {}: {}", remote_addr, e);
                    break "read error";
                }
            },
        }
    };

    relay.detach(id);
    // The peer may already be gone; closing is best-effort.
    let _ = sink.close().await;
    info!("Disconnected: {} ({})", remote_addr, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content_state::NormalizedContent;

    #[test]
    fn status_report_reflects_relay_and_health() {
        let state = AppState {
            relay: Arc::new(Relay::new(4)),
            health: Arc::new(SourceHealth::new()),
        };
        state.relay.publish(NormalizedContent::from_raw("a\nb", "Hymn", "music"));
        let _sub = state.relay.attach("127.0.0.1:5000".parse().unwrap());
        state.health.mark_failure("refused");

        let report = state.status_report();
        assert_eq!(report.subscribers, 1);
        assert_eq!(report.content_type, "MUSIC");
        assert_eq!(report.header, "Hymn");
        assert_eq!(report.lines, 2);
        assert!(!report.source.connected);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["contentType"], "MUSIC");
        assert_eq!(json["source"]["consecutiveErrors"], 1);
    }
}
