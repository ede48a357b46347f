//! # End-to-End Test Harness
//!
//! Shared fixtures for the tests in `tests/`: a scriptable stand-in for the
//! Holyrics text endpoint, a relay (poller + gateway) on an ephemeral port,
//! and a few WebSocket client helpers.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use lib_relay::core::{Relay, SourceHealth};
use lib_relay::gateway::{self, AppState};
use lib_relay::ingestors::{HolyricsPoller, PollerOptions};

/// A connected WebSocket test client.
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds a Holyrics `/view/text.json` body.
pub fn holyrics_body(text: &str, header: &str, content_type: &str) -> String {
    json!({ "map": { "text": text, "header": header, "type": content_type } }).to_string()
}

/// # Mock Presentation Server
///
/// Serves whatever body is currently set, or `503` while unavailable.
#[derive(Clone)]
pub struct MockSource {
    /// Where the mock listens.
    pub addr: SocketAddr,
    body: Arc<Mutex<Option<String>>>,
}

impl MockSource {
    pub async fn start(initial: Option<String>) -> Self {
        let body = Arc::new(Mutex::new(initial));
        let app = Router::new()
            .route("/view/text.json", get(source_handler))
            .with_state(Arc::clone(&body));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock source");
        let addr = listener.local_addr().expect("mock source address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, body }
    }

    pub fn set_body(&self, body: impl Into<String>) {
        *self.body.lock().unwrap() = Some(body.into());
    }

    pub fn set_unavailable(&self) {
        *self.body.lock().unwrap() = None;
    }
}

async fn source_handler(State(body): State<Arc<Mutex<Option<String>>>>) -> Response {
    let current = body.lock().unwrap().clone();
    match current {
        Some(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// # Relay Under Test
///
/// A poller and a gateway wired exactly like the server binary, with a fast
/// poll interval.
pub struct RelayHarness {
    /// Where the gateway listens.
    pub addr: SocketAddr,
    pub relay: Arc<Relay>,
    pub health: Arc<SourceHealth>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHarness {
    pub async fn start(source: SocketAddr, public_dir: Option<&Path>) -> Self {
        let relay = Arc::new(Relay::new(16));
        let health = Arc::new(SourceHealth::new());

        let options = PollerOptions {
            host: source.ip().to_string(),
            port: source.port(),
            interval: Duration::from_millis(20),
            fetch_timeout: Duration::from_millis(500),
            error_quiet_window: Duration::from_secs(1),
        };
        let poller = HolyricsPoller::new(options, Arc::clone(&relay), Arc::clone(&health)).expect("build poller");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        let addr = listener.local_addr().expect("relay address");
        let app = gateway::router(
            AppState {
                relay: Arc::clone(&relay),
                health: Arc::clone(&health),
            },
            public_dir,
        );

        let (shutdown, signal) = watch::channel(false);

        let poller_signal = stopped(signal.clone());
        let poller_task = tokio::spawn(async move { poller.run(poller_signal).await });

        let server_relay = Arc::clone(&relay);
        let server_task = tokio::spawn(async move {
            let _ = gateway::serve(listener, app, stopped(signal)).await;
            server_relay.disconnect_all();
        });

        Self {
            addr,
            relay,
            health,
            shutdown,
            tasks: vec![poller_task, server_task],
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Signals shutdown and waits for the poller and the server to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

async fn stopped(mut signal: watch::Receiver<bool>) {
    loop {
        let stop = *signal.borrow_and_update();
        if stop || signal.changed().await.is_err() {
            return;
        }
    }
}

pub async fn connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.expect("websocket handshake");
    ws
}

/// The next text frame parsed as JSON, or `None` if nothing arrives within
/// `wait` or the connection ends.
pub async fn next_payload(ws: &mut WsClient, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        match frame {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Polls `condition` until it holds or `within` elapses.
pub async fn wait_until(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
