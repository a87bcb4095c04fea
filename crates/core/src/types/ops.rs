//! Board operations carried inside envelope payloads

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{QPoint, Tool};
use crate::protocol::codec::{from_cbor, to_cbor};
use crate::{CoreError, Result};

/// Envelope type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Hello,
    StrokeStart,
    StrokeMoveBatch,
    StrokeEnd,
    DrawPermit,
    BgSet,
    BgClear,
    BgGoto,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Hello => "Hello",
            MsgType::StrokeStart => "StrokeStart",
            MsgType::StrokeMoveBatch => "StrokeMoveBatch",
            MsgType::StrokeEnd => "StrokeEnd",
            MsgType::DrawPermit => "DrawPermit",
            MsgType::BgSet => "BG_SET",
            MsgType::BgClear => "BG_CLEAR",
            MsgType::BgGoto => "BG_GOTO",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        Ok(match tag {
            "Hello" => MsgType::Hello,
            "StrokeStart" => MsgType::StrokeStart,
            "StrokeMoveBatch" => MsgType::StrokeMoveBatch,
            "StrokeEnd" => MsgType::StrokeEnd,
            "DrawPermit" => MsgType::DrawPermit,
            "BG_SET" => MsgType::BgSet,
            "BG_CLEAR" => MsgType::BgClear,
            "BG_GOTO" => MsgType::BgGoto,
            other => return Err(CoreError::UnknownMessageType(other.to_string())),
        })
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeStart {
    pub stroke_id: String,
    /// Packed ARGB
    pub color: i64,
    pub width_q: i16,
    #[serde(default)]
    pub tool: Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeMoveBatch {
    pub stroke_id: String,
    pub points: Vec<QPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeEnd {
    pub stroke_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawPermit {
    pub user_id: String,
    pub allowed: bool,
}

/// Background page image. `data` is base64 of the encoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BgSet {
    pub doc_id: String,
    pub page: i32,
    pub w: i32,
    pub h: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    pub fmt: String,
    pub data: String,
}

impl BgSet {
    pub fn from_image(
        doc_id: impl Into<String>,
        page: i32,
        (w, h): (i32, i32),
        page_count: Option<i32>,
        fmt: impl Into<String>,
        image: &[u8],
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            page,
            w,
            h,
            page_count,
            fmt: fmt.into(),
            data: BASE64.encode(image),
        }
    }

    /// Decode the base64 image bytes
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| CoreError::Decode(format!("BG_SET data: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgGoto {
    pub page: i32,
}

/// Closed set of operations a peer can exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardOp {
    Hello(Hello),
    StrokeStart(StrokeStart),
    StrokeMoveBatch(StrokeMoveBatch),
    StrokeEnd(StrokeEnd),
    DrawPermit(DrawPermit),
    BgSet(BgSet),
    BgClear,
    BgGoto(BgGoto),
}

impl BoardOp {
    pub fn msg_type(&self) -> MsgType {
        match self {
            BoardOp::Hello(_) => MsgType::Hello,
            BoardOp::StrokeStart(_) => MsgType::StrokeStart,
            BoardOp::StrokeMoveBatch(_) => MsgType::StrokeMoveBatch,
            BoardOp::StrokeEnd(_) => MsgType::StrokeEnd,
            BoardOp::DrawPermit(_) => MsgType::DrawPermit,
            BoardOp::BgSet(_) => MsgType::BgSet,
            BoardOp::BgClear => MsgType::BgClear,
            BoardOp::BgGoto(_) => MsgType::BgGoto,
        }
    }

    /// Stroke addressed by this op, if any
    pub fn stroke_id(&self) -> Option<&str> {
        match self {
            BoardOp::StrokeStart(s) => Some(&s.stroke_id),
            BoardOp::StrokeMoveBatch(m) => Some(&m.stroke_id),
            BoardOp::StrokeEnd(e) => Some(&e.stroke_id),
            _ => None,
        }
    }

    /// Bulk move batches may be shed under backpressure; everything else is control.
    pub fn is_droppable(&self) -> bool {
        matches!(self, BoardOp::StrokeMoveBatch(_))
    }

    /// Encode the payload for an envelope. `BG_CLEAR` has none.
    pub fn encode_payload(&self) -> Result<Option<Bytes>> {
        let bytes = match self {
            BoardOp::Hello(v) => to_cbor(v)?,
            BoardOp::StrokeStart(v) => to_cbor(v)?,
            BoardOp::StrokeMoveBatch(v) => to_cbor(v)?,
            BoardOp::StrokeEnd(v) => to_cbor(v)?,
            BoardOp::DrawPermit(v) => to_cbor(v)?,
            BoardOp::BgSet(v) => to_cbor(v)?,
            BoardOp::BgClear => return Ok(None),
            BoardOp::BgGoto(v) => to_cbor(v)?,
        };
        Ok(Some(Bytes::from(bytes)))
    }

    /// Decode a payload by explicit type-tag dispatch
    pub fn decode(msg_type: MsgType, payload: Option<&[u8]>) -> Result<Self> {
        if msg_type == MsgType::BgClear {
            return Ok(BoardOp::BgClear);
        }
        let bytes =
            payload.ok_or_else(|| CoreError::MissingPayload(msg_type.as_str().to_string()))?;
        Ok(match msg_type {
            MsgType::Hello => BoardOp::Hello(from_cbor(bytes)?),
            MsgType::StrokeStart => BoardOp::StrokeStart(from_cbor(bytes)?),
            MsgType::StrokeMoveBatch => BoardOp::StrokeMoveBatch(from_cbor(bytes)?),
            MsgType::StrokeEnd => BoardOp::StrokeEnd(from_cbor(bytes)?),
            MsgType::DrawPermit => BoardOp::DrawPermit(from_cbor(bytes)?),
            MsgType::BgSet => BoardOp::BgSet(from_cbor(bytes)?),
            MsgType::BgGoto => BoardOp::BgGoto(from_cbor(bytes)?),
            MsgType::BgClear => BoardOp::BgClear,
        })
    }
}

/// Raw JSON text frames sent by older builds for background control
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum LegacyFrame {
    #[serde(rename = "BG_SET")]
    BgSet(BgSet),
    #[serde(rename = "BG_CLEAR")]
    BgClear,
    #[serde(rename = "BG_GOTO")]
    BgGoto(BgGoto),
}

impl From<LegacyFrame> for BoardOp {
    fn from(frame: LegacyFrame) -> Self {
        match frame {
            LegacyFrame::BgSet(v) => BoardOp::BgSet(v),
            LegacyFrame::BgClear => BoardOp::BgClear,
            LegacyFrame::BgGoto(v) => BoardOp::BgGoto(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_type_tags() {
        for t in [
            MsgType::Hello,
            MsgType::StrokeStart,
            MsgType::StrokeMoveBatch,
            MsgType::StrokeEnd,
            MsgType::DrawPermit,
            MsgType::BgSet,
            MsgType::BgClear,
            MsgType::BgGoto,
        ] {
            assert_eq!(MsgType::parse(t.as_str()).unwrap(), t);
        }
        assert_eq!(MsgType::BgSet.as_str(), "BG_SET");
        assert!(matches!(
            MsgType::parse("Cursor"),
            Err(CoreError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn test_stroke_start_payload() {
        let op = BoardOp::StrokeStart(StrokeStart {
            stroke_id: "s1".into(),
            color: 0xFF000000,
            width_q: 60,
            tool: Tool::Pen,
        });
        let payload = op.encode_payload().unwrap().unwrap();
        let decoded = BoardOp::decode(MsgType::StrokeStart, Some(&payload)).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(decoded.stroke_id(), Some("s1"));
    }

    #[test]
    fn test_bg_clear_has_no_payload() {
        assert!(BoardOp::BgClear.encode_payload().unwrap().is_none());
        assert_eq!(BoardOp::decode(MsgType::BgClear, None).unwrap(), BoardOp::BgClear);
    }

    #[test]
    fn test_missing_payload() {
        let err = BoardOp::decode(MsgType::StrokeEnd, None).unwrap_err();
        assert!(matches!(err, CoreError::MissingPayload(_)));
    }

    #[test]
    fn test_payload_of_wrong_shape() {
        let payload = BoardOp::Hello(Hello { message: "hi".into() })
            .encode_payload()
            .unwrap()
            .unwrap();
        assert!(BoardOp::decode(MsgType::StrokeMoveBatch, Some(&payload)).is_err());
    }

    #[test]
    fn test_tool_defaults_to_pen() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct OldStart {
            stroke_id: String,
            color: i64,
            width_q: i16,
        }
        let bytes = to_cbor(&OldStart {
            stroke_id: "old".into(),
            color: 1,
            width_q: 5,
        })
        .unwrap();
        let start: StrokeStart = from_cbor(&bytes).unwrap();
        assert_eq!(start.tool, Tool::Pen);
    }

    #[test]
    fn test_unknown_tool_reads_as_pen() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct NewerStart {
            stroke_id: String,
            color: i64,
            width_q: i16,
            tool: String,
        }
        let payload = |tool: &str| {
            to_cbor(&NewerStart {
                stroke_id: "s".into(),
                color: 1,
                width_q: 5,
                tool: tool.into(),
            })
            .unwrap()
        };

        let op = BoardOp::decode(MsgType::StrokeStart, Some(&payload("laser"))).unwrap();
        assert!(matches!(op, BoardOp::StrokeStart(ref s) if s.tool == Tool::Pen && s.stroke_id == "s"));

        let op = BoardOp::decode(MsgType::StrokeStart, Some(&payload("eraser"))).unwrap();
        assert!(matches!(op, BoardOp::StrokeStart(ref s) if s.tool == Tool::Eraser));
    }

    #[test]
    fn test_bg_set_image_bytes() {
        let bg = BgSet::from_image("doc", 2, (640, 480), Some(5), "jpg", &[0xFF, 0xD8, 0xFF]);
        assert_eq!(bg.image_bytes().unwrap(), vec![0xFF, 0xD8, 0xFF]);

        let broken = BgSet { data: "***".into(), ..bg };
        assert!(broken.image_bytes().is_err());
    }

    #[test]
    fn test_only_move_batches_droppable() {
        let mv = BoardOp::StrokeMoveBatch(StrokeMoveBatch {
            stroke_id: "s".into(),
            points: vec![],
        });
        assert!(mv.is_droppable());
        assert!(!BoardOp::StrokeEnd(StrokeEnd { stroke_id: "s".into() }).is_droppable());
        assert!(!BoardOp::BgClear.is_droppable());
    }

    #[test]
    fn test_legacy_frame_json() {
        let json = r#"{"type":"BG_SET","docId":"d","page":1,"w":10,"h":20,"fmt":"jpg","data":"AAEC"}"#;
        let op: BoardOp = serde_json::from_str::<LegacyFrame>(json).unwrap().into();
        match op {
            BoardOp::BgSet(bg) => {
                assert_eq!(bg.doc_id, "d");
                assert_eq!(bg.page_count, None);
                assert_eq!(bg.image_bytes().unwrap(), vec![0, 1, 2]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let clear: BoardOp = serde_json::from_str::<LegacyFrame>(r#"{"type":"BG_CLEAR"}"#)
            .unwrap()
            .into();
        assert_eq!(clear, BoardOp::BgClear);
    }
}
