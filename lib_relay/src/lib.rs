//! # lib_relay
//!
//! Relays the "now displaying" text of a presentation server (song lyrics,
//! scripture) to any number of WebSocket subscribers.
//!
//! Pipeline: `ingestors` poll the source, `text` normalizes the markup,
//! `core` keeps the current slide and fans changes out, `gateway` serves the
//! subscribers. `loggers` sets up tracing for the binaries.
//!
//! Modules are gated by folder-named features; `full` (the default) enables all.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "gateway")]
pub mod gateway;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "text")]
pub mod text;
