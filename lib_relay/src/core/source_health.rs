//! # Source Health
//!
//! Connectivity bookkeeping for the upstream presentation server. The poller
//! records every transport outcome here; `/status` reports it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of upstream connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Whether the last fetch reached the source.
    pub connected: bool,
    /// Message of the failure that started the current outage.
    pub last_error: Option<String>,
    /// When the current outage started.
    pub error_time: Option<DateTime<Utc>>,
    /// Failed fetches since the last success.
    pub consecutive_errors: u64,
    /// When the source last answered.
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for SourceStatus {
    // Optimistic start: the first failure is reported as a lost connection.
    fn default() -> Self {
        Self {
            connected: true,
            last_error: None,
            error_time: None,
            consecutive_errors: 0,
            last_success: None,
        }
    }
}

/// What a recorded outcome did to the connected flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The flag did not change.
    Steady,
    /// Connected -> disconnected.
    Lost,
    /// Disconnected -> connected.
    Recovered,
}

/// Shared, guarded `SourceStatus`.
#[derive(Default)]
pub struct SourceHealth {
    inner: Mutex<SourceStatus>,
}

impl SourceHealth {
    /// Starts out connected with no history.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SourceStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a successful fetch.
    pub fn mark_success(&self) -> Transition {
        let mut status = self.lock();
        let was_connected = status.connected;
        status.connected = true;
        status.consecutive_errors = 0;
        status.last_error = None;
        status.error_time = None;
        status.last_success = Some(Utc::now());
        if was_connected { Transition::Steady } else { Transition::Recovered }
    }

    /// Records a failed fetch. The error message and time are kept from the
    /// first failure of an outage.
    pub fn mark_failure(&self, error: &str) -> Transition {
        let mut status = self.lock();
        status.consecutive_errors += 1;
        if !status.connected {
            return Transition::Steady;
        }
        status.connected = false;
        status.last_error = Some(error.to_string());
        status.error_time = Some(Utc::now());
        Transition::Lost
    }

    /// A copy of the current status.
    pub fn snapshot(&self) -> SourceStatus {
        self.lock().clone()
    }

    /// Shortcut for `snapshot().connected`.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outage_and_recovery_transitions() {
        let health = SourceHealth::new();
        assert_eq!(health.mark_success(), Transition::Steady);
        assert_eq!(health.mark_failure("refused"), Transition::Lost);
        assert_eq!(health.mark_failure("timeout"), Transition::Steady);

        let status = health.snapshot();
        assert!(!status.connected);
        assert_eq!(status.consecutive_errors, 2);
        assert_eq!(status.last_error.as_deref(), Some("refused"));
        assert!(status.error_time.is_some());

        assert_eq!(health.mark_success(), Transition::Recovered);
        let status = health.snapshot();
        assert!(status.connected);
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_value(SourceStatus::default()).unwrap();
        assert_eq!(json["connected"], true);
        assert_eq!(json["consecutiveErrors"], 0);
        assert!(json.get("lastError").is_some());
    }
}
