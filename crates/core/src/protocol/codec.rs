//! CBOR envelope codec with length-prefixed framing

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::types::{BoardOp, Envelope, LegacyFrame};

/// Maximum frame size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    Ok(buf)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(bytes)?)
}

/// One decoded frame body
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Envelope(Envelope),
    /// Raw JSON background control frame from an older peer
    Legacy(BoardOp),
}

/// Message codec for serialization/deserialization
pub struct MessageCodec;

impl MessageCodec {
    /// Encode envelope to bytes
    ///
    /// Returns Vec<u8> with length-prefixed format:
    /// [4 bytes length (big endian)] [CBOR envelope]
    pub fn encode(env: &Envelope) -> Result<Vec<u8>> {
        let payload = to_cbor(env)?;

        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    /// Split one length-prefixed frame off the front of `buf`.
    /// Returns the body and the number of bytes consumed, or `None` if incomplete.
    pub fn split_frame(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        if buf.len() < 4 + len {
            return Ok(None);
        }

        Ok(Some((&buf[4..4 + len], 4 + len)))
    }

    /// Decode a frame body: CBOR envelope first, then a legacy JSON text frame.
    pub fn decode_frame(body: &[u8]) -> Result<Frame> {
        let cbor_err = match from_cbor::<Envelope>(body) {
            Ok(env) => return Ok(Frame::Envelope(env)),
            Err(e) => e,
        };

        if body.first() == Some(&b'{') {
            if let Ok(legacy) = serde_json::from_slice::<LegacyFrame>(body) {
                return Ok(Frame::Legacy(legacy.into()));
            }
        }

        Err(cbor_err)
    }
}
