//! # Current Content State
//!
//! Holds the one piece of mutable state the relay cares about: what the
//! presentation server is displaying right now, in normalized form.
//!
//! ## Design:
//! - **Whole-structure replacement**: type, header, lines and the comparison
//!   key live behind a single mutex and are always replaced together, so a
//!   reader never observes a new header paired with old lines.
//! - **Guard-scoped callbacks**: `publish_if_changed` and `with_current` run a
//!   closure while the guard is held. The relay uses them to broadcast and to
//!   replay under the same lock, which orders replays against publishes.
//! - Closures run under a `std::sync::Mutex`; they must not block or await.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::text::normalizer::{self, ContentKind};

/// The canonical unit of state: one normalized slide.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedContent {
    /// Segmentation rule the lines were produced with.
    pub kind: ContentKind,
    /// Upper-cased source type tag, forwarded verbatim to subscribers.
    pub type_tag: String,
    /// Slide header (song title, verse reference).
    pub header: String,
    /// Display lines in order; never empty or whitespace-only.
    pub lines: Vec<String>,
}

impl NormalizedContent {
    /// Normalizes a raw slide.
    pub fn from_raw(text: &str, header: &str, content_type: &str) -> Self {
        let type_tag = content_type.trim().to_uppercase();
        Self {
            kind: ContentKind::from_tag(&type_tag),
            lines: normalizer::normalize(text, &type_tag),
            header: header.to_string(),
            type_tag,
        }
    }

    /// True when there is neither a header nor any line to show.
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.lines.is_empty()
    }

    /// The comparison key used to detect genuine changes between polls.
    pub fn comparison_key(&self) -> String {
        self.lines.join("\n")
    }

    /// The wire form sent to subscribers.
    pub fn to_payload(&self) -> TextPayload {
        TextPayload {
            content_type: self.type_tag.clone(),
            header: self.header.clone(),
            content: self.lines.clone(),
        }
    }
}

/// JSON payload pushed to every subscriber:
/// `{"type": "...", "header": "...", "content": ["line", ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    /// Upper-cased source type tag.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Slide header.
    pub header: String,
    /// Display lines.
    pub content: Vec<String>,
}

struct StoredContent {
    content: NormalizedContent,
    key: String,
}

/// Mutually exclusive holder of the current slide.
pub struct ContentState {
    inner: Mutex<StoredContent>,
}

impl Default for ContentState {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentState {
    /// Creates an empty state: no header, no lines.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoredContent {
                content: NormalizedContent::default(),
                key: String::new(),
            }),
        }
    }

    // Every write replaces the whole struct, so a poisoned guard still holds
    // consistent data.
    fn lock(&self) -> MutexGuard<'_, StoredContent> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of the current slide (possibly empty).
    pub fn read(&self) -> NormalizedContent {
        self.lock().content.clone()
    }

    /// Replaces the stored slide if the candidate's comparison key differs.
    ///
    /// Returns `true` when the state was replaced.
    pub fn compare_and_set(&self, candidate: NormalizedContent) -> bool {
        self.publish_if_changed(candidate, |_| {})
    }

    /// `compare_and_set`, then runs `on_change` with the new slide before the
    /// guard is released.
    pub fn publish_if_changed<F>(&self, candidate: NormalizedContent, on_change: F) -> bool
    where
        F: FnOnce(&NormalizedContent),
    {
        let key = candidate.comparison_key();
        let mut stored = self.lock();
        if stored.key == key {
            return false;
        }
        *stored = StoredContent { content: candidate, key };
        on_change(&stored.content);
        true
    }

    /// Runs `f` against the current slide while holding the guard.
    pub fn with_current<R>(&self, f: impl FnOnce(&NormalizedContent) -> R) -> R {
        let stored = self.lock();
        f(&stored.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(lines: &[&str], header: &str) -> NormalizedContent {
        NormalizedContent {
            kind: ContentKind::Generic,
            type_tag: "MUSIC".to_string(),
            header: header.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn starts_empty() {
        let state = ContentState::new();
        assert!(state.read().is_empty());
    }

    #[test]
    fn compare_and_set_replaces_only_on_new_lines() {
        let state = ContentState::new();
        assert!(state.compare_and_set(slide(&["a", "b"], "Hymn")));
        assert!(!state.compare_and_set(slide(&["a", "b"], "Hymn")));
        assert!(state.compare_and_set(slide(&["a", "c"], "Hymn")));
        assert_eq!(state.read().lines, vec!["a", "c"]);
    }

    #[test]
    fn header_only_change_is_not_a_change() {
        let state = ContentState::new();
        assert!(state.compare_and_set(slide(&["a"], "One")));
        assert!(!state.compare_and_set(slide(&["a"], "Two")));
        assert_eq!(state.read().header, "One");
    }

    #[test]
    fn empty_candidate_against_empty_state_is_unchanged() {
        let state = ContentState::new();
        assert!(!state.compare_and_set(slide(&[], "")));
    }

    #[test]
    fn clearing_the_screen_is_a_change() {
        let state = ContentState::new();
        assert!(state.compare_and_set(slide(&["a"], "Hymn")));
        assert!(state.compare_and_set(slide(&[], "")));
        assert!(state.read().is_empty());
    }

    #[test]
    fn on_change_sees_the_new_slide_under_the_guard() {
        let state = ContentState::new();
        let mut seen = None;
        let changed = state.publish_if_changed(slide(&["x"], "H"), |c| seen = Some(c.lines.clone()));
        assert!(changed);
        assert_eq!(seen, Some(vec!["x".to_string()]));

        let mut called = false;
        state.publish_if_changed(slide(&["x"], "H"), |_| called = true);
        assert!(!called);
    }

    #[test]
    fn from_raw_upper_cases_the_type_and_normalizes() {
        let content = NormalizedContent::from_raw("<p>Amazing &amp; Grace</p>", "Hymn", "music");
        assert_eq!(content.type_tag, "MUSIC");
        assert_eq!(content.kind, ContentKind::Generic);
        assert_eq!(content.lines, vec!["Amazing & Grace"]);

        let scripture = NormalizedContent::from_raw("A. B.)", "John 1", "bible");
        assert_eq!(scripture.kind, ContentKind::Scripture);
        assert_eq!(scripture.lines, vec!["A", "B"]);
    }

    #[test]
    fn payload_serializes_with_wire_field_names() {
        let content = NormalizedContent::from_raw("<p>Amazing &amp; Grace</p>", "Hymn", "music");
        let json = serde_json::to_value(content.to_payload()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "MUSIC", "header": "Hymn", "content": ["Amazing & Grace"]})
        );
    }
}
