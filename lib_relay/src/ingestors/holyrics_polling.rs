//! # Holyrics Polling Ingestor
//!
//! Polls the presentation server's "now displaying" endpoint
//! (`http://<host>:<port>/view/text.json`) on a short fixed interval and
//! publishes every genuine change through the `Relay`.
//!
//! ## Key Design Principles:
//! - **One cycle per tick**: each tick awaits its own fetch before the next
//!   tick is taken (`MissedTickBehavior::Delay`), and the HTTP client carries
//!   a request timeout, so cycles never pile up.
//! - **Resilience**: transport and decode failures end the current cycle only.
//!   Nothing but the shutdown future stops the loop.
//! - **Quiet failures**: an unreachable source is reported at most once per
//!   quiet window, a recovery exactly once.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::core::content_state::NormalizedContent;
use crate::core::relay::Relay;
use crate::core::source_health::{SourceHealth, Transition};

/// Path of the "now displaying" endpoint on the presentation server.
pub const TEXT_ENDPOINT: &str = "/view/text.json";

/// Errors a single poll cycle can end with. None of them stops the loop.
#[derive(Debug, Error)]
pub enum PollError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// Connection refused, timeout, broken body, ...
    #[error("request to {url} failed: {source}")]
    Transport {
        /// The URL that was requested.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The source answered with a non-success status.
    #[error("source answered with HTTP {0}")]
    Status(u16),
    /// The body was not the expected JSON shape.
    #[error("malformed source payload: {0}")]
    Decode(String),
}

impl PollError {
    /// Whether the error means the source could not be reached properly.
    pub fn is_transport(&self) -> bool {
        matches!(self, PollError::Transport { .. } | PollError::Status(_))
    }
}

/// One raw slide as the source reports it, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawUpdate {
    /// Slide text, possibly HTML with entities.
    pub text: String,
    /// Slide header.
    pub header: String,
    /// Source type tag (`MUSIC`, `BIBLE`, ...), any case.
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Deserialize)]
struct TextEnvelope {
    map: RawUpdate,
}

/// Decodes a `/view/text.json` body: an object with a `map` object holding
/// string `text`, `header` and `type` fields.
pub fn decode_body(body: &[u8]) -> Result<RawUpdate, PollError> {
    serde_json::from_slice::<TextEnvelope>(body)
        .map(|envelope| envelope.map)
        .map_err(|e| PollError::Decode(e.to_string()))
}

/// What a successful cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Same lines as before; nothing was sent.
    Unchanged,
    /// New lines were stored and broadcast.
    Published,
}

/// Poller settings. Everything is passed in at construction; there are no
/// hidden timers or globals.
#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Presentation server host name or address.
    pub host: String,
    /// Presentation server port.
    pub port: u16,
    /// Time between cycles.
    pub interval: Duration,
    /// Per-request timeout.
    pub fetch_timeout: Duration,
    /// Minimum time between two failure reports.
    pub error_quiet_window: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4747,
            interval: Duration::from_millis(200),
            fetch_timeout: Duration::from_secs(2),
            error_quiet_window: Duration::from_secs(5),
        }
    }
}

impl PollerOptions {
    /// Full URL of the text endpoint.
    pub fn source_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, TEXT_ENDPOINT)
    }
}

/// Lets an event through at most once per window.
struct QuietWindow {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl QuietWindow {
    fn new(window: Duration) -> Self {
        Self { window, last: Mutex::new(None) }
    }

    fn ready(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// # Holyrics Poller
///
/// The long-running producer of the relay. Owns its HTTP client and shares
/// the relay and the health record with the gateway.
pub struct HolyricsPoller {
    relay: Arc<Relay>,
    health: Arc<SourceHealth>,
    client: reqwest::Client,
    url: String,
    interval: Duration,
    transport_log: QuietWindow,
    decode_log: QuietWindow,
}

impl HolyricsPoller {
    /// Builds a poller and its HTTP client.
    pub fn new(
        options: PollerOptions,
        relay: Arc<Relay>,
        health: Arc<SourceHealth>,
    ) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .timeout(options.fetch_timeout)
            .user_agent(concat!("lyrics-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PollError::Client)?;

        Ok(Self {
            relay,
            health,
            client,
            url: options.source_url(),
            interval: options.interval,
            transport_log: QuietWindow::new(options.error_quiet_window),
            decode_log: QuietWindow::new(options.error_quiet_window),
        })
    }

    /// The URL being polled.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// # Main Execution Loop
    ///
    /// Runs one cycle per tick until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Polling {} every {:?}", self.url, self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Poller received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        trace!("poll cycle ended early: {}", e);
                    }
                }
            }
        }
    }

    /// # Execute Poll
    ///
    /// One fetch, decode, normalize and publish cycle. Failures are recorded
    /// and logged here; the caller only needs the result for diagnostics.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollError> {
        let body = match self.fetch().await {
            Ok(body) => body,
            Err(e) => {
                self.record_transport_failure(&e);
                return Err(e);
            }
        };

        if self.health.mark_success() == Transition::Recovered {
            info!("Connection to {} restored", self.url);
        }

        match decode_body(&body) {
            Ok(update) => Ok(self.ingest(update)),
            Err(e) => {
                if self.decode_log.ready() {
                    warn!("Ignoring response from {}: {}", self.url, e);
                }
                Err(e)
            }
        }
    }

    /// Normalizes a raw update and publishes it if its lines changed.
    pub fn ingest(&self, update: RawUpdate) -> PollOutcome {
        let candidate = NormalizedContent::from_raw(&update.text, &update.header, &update.content_type);
        if self.relay.publish(candidate) {
            PollOutcome::Published
        } else {
            debug!("source text unchanged");
            PollOutcome::Unchanged
        }
    }

    async fn fetch(&self) -> Result<Vec<u8>, PollError> {
        let transport = |source| PollError::Transport { url: self.url.clone(), source };

        let response = self.client.get(&self.url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }

    fn record_transport_failure(&self, e: &PollError) {
        let transition = self.health.mark_failure(&e.to_string());
        if !self.transport_log.ready() {
            return;
        }
        match transition {
            Transition::Lost => error!("Lost connection to source: {}", e),
            _ => {
                let failures = self.health.snapshot().consecutive_errors;
                error!("Source still unreachable after {} attempts: {}", failures, e);
            }
        }
    }
}
