//! # Core Relay Module
//!
//! The shared state of the relay and the machinery that moves it to clients.
//!
//! ## Core Components:
//!
//! - **`content_state`**: the current normalized slide behind a single guard,
//!   with compare-and-set semantics keyed on the normalized lines.
//!
//! - **`dispatcher`**: the subscriber registry and the zero-copy, never-await
//!   broadcast over bounded per-subscriber channels.
//!
//! - **`relay`**: the facade that publishes and replays under the content
//!   guard so that replays and broadcasts stay ordered.
//!
//! - **`source_health`**: upstream connectivity bookkeeping reported on `/status`.

/// The current slide and its compare-and-set guard.
pub mod content_state;
/// Subscriber registry and broadcast gateway.
pub mod dispatcher;
/// Publish/attach facade over content state and dispatcher.
pub mod relay;
/// Upstream connectivity status.
pub mod source_health;

// --- Public API Re-exports ---
pub use content_state::{ContentState, NormalizedContent, TextPayload};
pub use dispatcher::{DEFAULT_SUBSCRIBER_BUFFER, Dispatcher, SubscriberId, Subscription};
pub use relay::Relay;
pub use source_health::{SourceHealth, SourceStatus, Transition};
