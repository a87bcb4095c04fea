//! Frame reader for length-prefixed QUIC messages
//!
//! Protocol format: [4-byte big-endian length][N-byte body]. The body is a
//! CBOR envelope, or a legacy JSON text frame.

use classboard_core::protocol::MAX_MESSAGE_SIZE;
use classboard_core::{CoreError, Frame, MessageCodec, Result};
use quinn::RecvStream;

/// Reads complete frames from a QUIC stream
pub struct MessageReader {
    recv: RecvStream,
}

impl MessageReader {
    pub fn new(recv: RecvStream) -> Self {
        Self { recv }
    }

    /// Read the next frame.
    ///
    /// A body that fails to decode yields `CoreError::Decode` and the stream
    /// stays usable. Stream errors yield `ConnectionLost`.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut len_buf = [0u8; 4];
        self.recv
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| CoreError::ConnectionLost(format!("reading length: {}", e)))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            // The stream cannot be resynchronized past an oversized frame
            return Err(CoreError::ConnectionLost(format!(
                "frame of {} bytes exceeds {}",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut body = vec![0u8; len];
        self.recv
            .read_exact(&mut body)
            .await
            .map_err(|e| CoreError::ConnectionLost(format!("reading body: {}", e)))?;

        MessageCodec::decode_frame(&body)
    }
}
