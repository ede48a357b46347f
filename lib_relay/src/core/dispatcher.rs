//! # Subscriber Dispatcher
//!
//! The registry of live push connections and the fan-out that feeds them.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: a payload is serialized once and wrapped in an
//!     `Arc<str>`. Every subscriber receives a pointer to the same buffer.
//!
//! 2.  **Never Await Inside the Fan-out**: each subscriber owns a bounded MPSC
//!     channel drained by its connection task. `broadcast` only calls
//!     `try_send`, so a stalled socket can never hold up the publisher or the
//!     other subscribers.
//!
//! 3.  **Drop on Failure**: a closed channel (the connection task is gone) or
//!     a full one (the client stopped reading) is a failed send. The subscriber
//!     is removed inside the same `retain` pass and its sender is dropped, which
//!     ends the connection task's receive loop and closes the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Default number of payloads a subscriber may have queued before it is
/// considered too slow and dropped.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Stable identity of one subscriber for its whole lifetime.
pub type SubscriberId = u64;

/// A registered subscriber as seen by the dispatcher.
struct ClientHandle {
    id: SubscriberId,
    remote_addr: SocketAddr,
    sender: mpsc::Sender<Arc<str>>,
}

/// Handed to the connection task on registration.
#[derive(Debug)]
pub struct Subscription {
    /// The id to unregister with.
    pub id: SubscriberId,
    /// Peer address, used in log lines.
    pub remote_addr: SocketAddr,
    /// Payloads to write to the socket, in order. Yields `None` once the
    /// dispatcher has dropped this subscriber.
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Registry of subscribers plus the broadcast gateway over them.
pub struct Dispatcher {
    clients: Mutex<Vec<ClientHandle>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher whose subscribers queue at most `buffer`
    /// payloads (at least one).
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    // Membership is a plain Vec edited with push/retain; a poisoned guard is
    // still a valid list.
    fn lock(&self) -> MutexGuard<'_, Vec<ClientHandle>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Add Client
    ///
    /// Registers a new subscriber and returns the receiving half of its
    /// channel.
    pub fn add_client(&self, remote_addr: SocketAddr) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.lock().push(ClientHandle { id, remote_addr, sender });
        debug!(subscriber = id, %remote_addr, "subscriber registered");

        Subscription { id, remote_addr, receiver }
    }

    /// Unregisters a subscriber. Returns `false` if it was already gone,
    /// which is expected when a failed broadcast removed it first.
    pub fn remove_client(&self, id: SubscriberId) -> bool {
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|c| c.id != id);
        before != clients.len()
    }

    /// # Broadcast
    ///
    /// Pushes `payload` to every registered subscriber and removes every
    /// subscriber the push failed for. The registry lock is held for the
    /// whole pass, so concurrent registrations land either before or after it.
    ///
    /// Returns the number of subscribers the payload was queued for.
    pub fn broadcast(&self, payload: Arc<str>) -> usize {
        let mut clients = self.lock();
        let mut delivered = 0;

        clients.retain(|client| match client.sender.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = client.id, remote_addr = %client.remote_addr, "subscriber too slow, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                info!(subscriber = client.id, remote_addr = %client.remote_addr, "subscriber gone, removing");
                false
            }
        });

        debug!(delivered, "broadcast complete");
        delivered
    }

    /// Queues `payload` for a single subscriber, removing it on failure.
    ///
    /// Returns `false` if the subscriber is unknown or the send failed.
    pub fn send_to(&self, id: SubscriberId, payload: Arc<str>) -> bool {
        let mut clients = self.lock();
        let Some(position) = clients.iter().position(|c| c.id == id) else {
            return false;
        };
        if clients[position].sender.try_send(payload).is_ok() {
            return true;
        }
        let client = clients.remove(position);
        warn!(subscriber = client.id, remote_addr = %client.remote_addr, "direct send failed, subscriber removed");
        false
    }

    /// Number of currently registered subscribers.
    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Drops every subscriber, closing all connections. Used on shutdown.
    pub fn clear(&self) -> usize {
        let mut clients = self.lock();
        let dropped = clients.len();
        clients.clear();
        dropped
    }
}
