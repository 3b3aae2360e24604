//! Wire formats and client-side state handling
//!
//! `protocol` is the reliable control plane (bincode). `packets` is the
//! fast lane: fixed-size little-endian records packed into pooled buffers.

pub mod codec;
pub mod interpolation;
pub mod packets;
pub mod pool;
pub mod prediction;
pub mod protocol;
