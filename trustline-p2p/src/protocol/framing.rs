//! Length-prefixed message framing codec.
//!
//! Messages are framed as:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian payload length
//! - N bytes: bincode-serialized Message

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use trustline_core::Message;

use crate::config::{MAX_MESSAGE_SIZE, NETWORK_MAGIC};
use crate::error::{P2pError, P2pResult};

/// Header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Codec for length-prefixed message framing.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Payload length of the current frame, once its header has been read.
    current_length: Option<usize>,
}

impl MessageCodec {
    /// Create a new message codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

/// Encode a message into a complete frame.
pub fn encode_frame(message: &Message) -> P2pResult<Bytes> {
    let mut buf = BytesMut::new();
    write_frame(message, &mut buf)?;
    Ok(buf.freeze())
}

fn write_frame(message: &Message, dst: &mut BytesMut) -> P2pResult<()> {
    let payload = message.to_bytes()?;
    let length = payload.len();

    if length > MAX_MESSAGE_SIZE {
        return Err(P2pError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    dst.reserve(HEADER_SIZE + length);
    dst.put_slice(&NETWORK_MAGIC);
    dst.put_u32(length as u32);
    dst.put_slice(&payload);

    Ok(())
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> P2pResult<Option<Self::Item>> {
        let length = match self.current_length {
            Some(length) => length,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let magic = [src[0], src[1], src[2], src[3]];
                if magic != NETWORK_MAGIC {
                    return Err(P2pError::InvalidMagic {
                        expected: NETWORK_MAGIC,
                        actual: magic,
                    });
                }

                let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if length > MAX_MESSAGE_SIZE {
                    return Err(P2pError::MessageTooLarge {
                        size: length,
                        max: MAX_MESSAGE_SIZE,
                    });
                }

                self.current_length = Some(length);
                length
            }
        };

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);
        self.current_length = None;

        let message = Message::from_bytes(&payload)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = P2pError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> P2pResult<()> {
        write_frame(&message, dst)
    }
}
