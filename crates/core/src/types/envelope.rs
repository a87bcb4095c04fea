//! Wire envelope wrapping every board operation

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{BoardOp, MsgType};
use crate::Result;

/// User id used for host-originated envelopes and snapshot replay
pub const SERVER_USER: &str = "server";

/// Wire wrapper: type tag, routing and ordering metadata, opaque payload.
///
/// `global_seq` is present only once the host has confirmed the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "localSeq", default, skip_serializing_if = "Option::is_none")]
    pub local_seq: Option<u64>,
    #[serde(rename = "globalSeq", default, skip_serializing_if = "Option::is_none")]
    pub global_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Bytes>,
}

impl Envelope {
    /// Wrap an operation for sending
    pub fn pack(user_id: impl Into<String>, op: &BoardOp, local_seq: Option<u64>) -> Result<Self> {
        Ok(Self {
            msg_type: op.msg_type().as_str().to_string(),
            user_id: user_id.into(),
            local_seq,
            global_seq: None,
            payload: op.encode_payload()?,
        })
    }

    /// Wrap a host-originated operation
    pub fn from_server(op: &BoardOp) -> Result<Self> {
        Self::pack(SERVER_USER, op, None)
    }

    /// Decode the payload into a typed operation
    pub fn op(&self) -> Result<BoardOp> {
        let msg_type = MsgType::parse(&self.msg_type)?;
        BoardOp::decode(msg_type, self.payload.as_deref())
    }

    /// Stamp with a host-assigned global sequence number
    pub fn confirmed(mut self, global_seq: u64) -> Self {
        self.global_seq = Some(global_seq);
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.global_seq.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hello, StrokeEnd};
    use crate::CoreError;

    #[test]
    fn test_pack_and_open() {
        let op = BoardOp::Hello(Hello { message: "Hi from alice".into() });
        let env = Envelope::pack("alice", &op, Some(1)).unwrap();
        assert_eq!(env.msg_type, "Hello");
        assert_eq!(env.local_seq, Some(1));
        assert!(!env.is_confirmed());
        assert_eq!(env.op().unwrap(), op);
    }

    #[test]
    fn test_confirm() {
        let env = Envelope::from_server(&BoardOp::StrokeEnd(StrokeEnd { stroke_id: "a".into() }))
            .unwrap()
            .confirmed(7);
        assert_eq!(env.global_seq, Some(7));
        assert_eq!(env.user_id, SERVER_USER);
    }

    #[test]
    fn test_unknown_type() {
        let env = Envelope {
            msg_type: "Laser".into(),
            user_id: "u".into(),
            local_seq: None,
            global_seq: None,
            payload: None,
        };
        assert!(matches!(env.op(), Err(CoreError::UnknownMessageType(_))));
    }
}
