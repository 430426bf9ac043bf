//! Deterministic binary serialization for wire messages.
//!
//! Message payloads are encoded with bincode under a fixed configuration so
//! both ends of a trustline agree byte-for-byte on every frame.

mod bincode_config;

pub use bincode_config::{deserialize, serialize};
