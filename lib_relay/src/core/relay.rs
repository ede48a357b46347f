//! # Relay
//!
//! Ties the current content to the subscribers. Both operations that touch
//! the two together run under the content guard:
//!
//! - `publish`: compare, replace, broadcast.
//! - `attach`: register, replay the current slide into the new channel.
//!
//! Because of that shared guard a new subscriber's replay is always queued
//! before any later broadcast, and a broadcast racing the registration shows
//! up either as the replay or after it, never ahead of it.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use crate::core::content_state::{ContentState, NormalizedContent};
use crate::core::dispatcher::{Dispatcher, SubscriberId, Subscription};

/// Process-wide relay state.
pub struct Relay {
    state: ContentState,
    dispatcher: Dispatcher,
}

impl Relay {
    /// A relay with empty content whose subscribers buffer `subscriber_buffer`
    /// payloads.
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            state: ContentState::new(),
            dispatcher: Dispatcher::new(subscriber_buffer),
        }
    }

    /// Publishes `candidate` if its lines differ from the current ones.
    ///
    /// Returns `true` when the state changed and a broadcast was made.
    pub fn publish(&self, candidate: NormalizedContent) -> bool {
        self.state.publish_if_changed(candidate, |content| {
            let Some(payload) = serialize(content) else {
                return;
            };
            let delivered = self.dispatcher.broadcast(payload);
            info!(
                content_type = %content.type_tag,
                header = %content.header,
                lines = content.lines.len(),
                delivered,
                "updated text sent"
            );
        })
    }

    /// Registers a subscriber and, when there is something on screen, queues
    /// the current slide as its first payload.
    pub fn attach(&self, remote_addr: SocketAddr) -> Subscription {
        self.state.with_current(|content| {
            let subscription = self.dispatcher.add_client(remote_addr);
            if !content.is_empty() {
                if let Some(payload) = serialize(content) {
                    self.dispatcher.send_to(subscription.id, payload);
                }
            }
            subscription
        })
    }

    /// Unregisters a subscriber; a no-op if it is already gone.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.dispatcher.remove_client(id)
    }

    /// The current slide.
    pub fn current(&self) -> NormalizedContent {
        self.state.read()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.client_count()
    }

    /// Drops every subscriber, which closes their connections.
    pub fn disconnect_all(&self) -> usize {
        self.dispatcher.clear()
    }
}

fn serialize(content: &NormalizedContent) -> Option<Arc<str>> {
    match serde_json::to_string(&content.to_payload()) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize payload: {}", e);
            None
        }
    }
}
