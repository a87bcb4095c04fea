//! Stroke geometry types

use serde::{Deserialize, Deserializer, Serialize};

/// Drawing tool carried by a stroke. Unknown names read as [`Tool::Pen`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Pen => "pen",
            Tool::Eraser => "eraser",
        }
    }
}

impl std::str::FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pen" => Ok(Tool::Pen),
            "eraser" => Ok(Tool::Eraser),
            other => Err(format!("unknown tool: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Tool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or_default())
    }
}

/// Quantized point as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QPoint {
    pub x: i16,
    pub y: i16,
}

/// Point in normalized canvas space (`0..=1` on both axes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f32,
    pub y: f32,
}

impl NormPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn dist_sq(&self, other: &NormPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn dist(&self, other: &NormPoint) -> f32 {
        self.dist_sq(other).sqrt()
    }
}

/// Materialized stroke held in a peer's board
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub id: String,
    /// Packed ARGB
    pub color: i64,
    /// Normalized width
    pub width: f32,
    pub tool: Tool,
    pub points: Vec<NormPoint>,
}

impl Stroke {
    pub fn new(id: impl Into<String>, color: i64, width: f32, tool: Tool) -> Self {
        Self {
            id: id.into(),
            color,
            width,
            tool,
            points: Vec::new(),
        }
    }
}
