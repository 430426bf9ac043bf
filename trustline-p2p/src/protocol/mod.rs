//! Trustline wire protocol.
//!
//! The message record itself lives in `trustline-core`; this module frames
//! it for a byte stream.

pub mod framing;

pub use framing::{encode_frame, MessageCodec};
pub use trustline_core::{Message, MessageKind};
