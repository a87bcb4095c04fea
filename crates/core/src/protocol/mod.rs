//! Wire protocol: envelope framing and coordinate quantization

pub mod codec;
pub mod quant;

pub use codec::{Frame, MessageCodec, MAX_MESSAGE_SIZE};
