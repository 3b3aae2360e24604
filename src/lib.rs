//! Arena Core Library
//!
//! Simulation core for a real-time arena game: a fixed-capacity entity
//! store, spatial partitioning, collision, a double-buffered world for
//! concurrent readers, the binary wire format, and client-side prediction.
//!
//! # Features
//!
//! - `anticheat` - Live input validation and server-authoritative replay validation (enabled by default)
//! - `metrics_extended` - Per-system counters in the metrics snapshot (enabled by default)
//! - `minimal` - Build without optional features for testing/debugging

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod puzzle;
pub mod metrics;

// Feature-gated modules (enabled by default)
#[cfg(feature = "anticheat")]
pub mod anticheat;
