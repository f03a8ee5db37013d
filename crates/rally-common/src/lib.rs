//! Shared wire protocol for the rally session relay.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// State-blob compression codec and content hashing.
pub mod blob;
/// Protocol constants shared by the relay and its clients.
pub mod types;
/// JSON envelope codec and message shapes.
pub mod wire;

pub use wire::{InboundEnvelope, ServerEvent};
