//! # Data Ingestors Module
//!
//! Clients that bring presentation text into the relay. Each submodule knows
//! one source's protocol and hands normalized content to `core::Relay`.
//!
//! ## Contained Modules:
//! - **`holyrics_polling`**: a fixed-interval REST poller for the Holyrics
//!   `/view/text.json` endpoint.

/// The fixed-interval REST poller for the presentation server.
pub mod holyrics_polling;

// --- Public API Re-exports ---
pub use holyrics_polling::{HolyricsPoller, PollError, PollOutcome, PollerOptions, RawUpdate};
