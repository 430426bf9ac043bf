//! Trustline node library.
//!
//! This library provides the pieces of the `trustline-node` binary: flag
//! parsing, configuration, the operator console and signal handling. It
//! can also be used for testing and embedding.

pub mod cli;
pub mod config;
pub mod console;
pub mod shutdown;
