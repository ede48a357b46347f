//! # Text Module
//!
//! Everything that turns presentation-server markup into display lines.
//!
//! - **`normalizer`**: tag stripping, entity decoding, artifact removal and
//!   the scripture/generic segmentation rules.

/// Markup cleanup and line segmentation.
pub mod normalizer;

pub use normalizer::{ContentKind, normalize};
