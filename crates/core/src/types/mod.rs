//! Domain types for board synchronization

mod envelope;
mod ops;
mod stroke;

pub use envelope::{Envelope, SERVER_USER};
pub(crate) use ops::LegacyFrame;
pub use ops::{
    BgGoto, BgSet, BoardOp, DrawPermit, Hello, MsgType, StrokeEnd, StrokeMoveBatch, StrokeStart,
};
pub use stroke::{NormPoint, QPoint, Stroke, Tool};
