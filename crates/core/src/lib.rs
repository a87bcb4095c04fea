//! Classboard Core - shared logic for whiteboard synchronization
//!
//! This crate provides:
//! - Wire types (envelope, board operations, strokes)
//! - Protocol handling (CBOR framing, quantization)
//! - Board state with partial erase
//! - Stroke capture and client sync
//! - QUIC transport configuration and reconnect scheduling
//! - Error types

// Version constants
pub const PROTOCOL_VERSION: u32 = 1;
pub const APP_VERSION_STRING: &str = "0.1.0";

pub mod board;
pub mod capture;
pub mod eraser;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod transport;
pub mod types;

// Re-export common types
pub use board::{Background, Board};
pub use capture::{CaptureConfig, DrawPermitFlag, LocalOrigin, OpSink, StrokeCapture};
pub use error::{CoreError, Result};
pub use protocol::{Frame, MessageCodec};
pub use sync::{Applied, ClientSync};
pub use transport::{ConnectionState, ReconnectConfig, ReconnectScheduler, TransportTuning};
pub use types::{BoardOp, Envelope, MsgType, NormPoint, QPoint, Stroke, Tool, SERVER_USER};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants_defined() {
        assert_eq!(PROTOCOL_VERSION, 1);
        assert!(APP_VERSION_STRING.starts_with("0.1"));
    }
}
