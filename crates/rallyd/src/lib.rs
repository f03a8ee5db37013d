//! Session relay server — hub-and-spoke telemetry broker over WebSocket.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Protocol command handlers and session termination.
pub mod dispatch;
/// Error types for relay server operations.
pub mod error;
/// Health endpoint and Prometheus metrics helpers.
pub mod metrics;
/// Session code, participant id and resume token generation.
pub mod mint;
/// Process-global session registry.
pub mod registry;
/// Location and route payload sanitization.
pub mod sanitize;
/// Accept loop and shared server state.
pub mod server;
/// Session record, peers and directed sends.
pub mod session;
/// Periodic session-expiry sweep.
pub mod supervisor;
/// Byte metering with a bounded per-second window.
pub mod traffic;

pub use server::{run, ServerState};
