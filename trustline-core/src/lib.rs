//! Core types for the trustline payment node.
//!
//! This crate provides:
//!
//! - [`Message`] and [`MessageKind`], the wire record exchanged by peers
//! - Deterministic serialization of message payloads
//! - [`Trustline`], the checked bilateral balance pair
//!
//! Nothing in here does I/O; the networking and state management live in
//! `trustline-p2p`.

pub mod error;
pub mod message;
pub mod serialization;
pub mod trustline;

pub use error::{BalanceError, SerializationError};
pub use message::{Message, MessageKind};
pub use trustline::Trustline;
