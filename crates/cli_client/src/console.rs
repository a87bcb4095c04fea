//! Interactive console on stdin

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use classboard_core::{NormPoint, StrokeCapture, Tool};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::client::{ClientHandle, OpSender};

/// Spacing between synthetic samples of a `draw` gesture
pub const SAMPLE_SPACING: Duration = Duration::from_millis(4);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Tool(Tool),
    Width(f32),
    Color(i64),
    Draw(Vec<NormPoint>),
    Connect,
    Disconnect,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  tool pen|eraser
  width <normalized width>
  color <hex ARGB, e.g. FF0000FF>
  draw x,y x,y ...
  connect | disconnect | status | help | quit";

fn parse_point(raw: &str) -> Result<NormPoint> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("expected x,y, got {}", raw))?;
    let x: f32 = x.trim().parse().with_context(|| format!("invalid x in {}", raw))?;
    let y: f32 = y.trim().parse().with_context(|| format!("invalid y in {}", raw))?;
    Ok(NormPoint::new(x, y))
}

/// ARGB color from hex, with or without a `#` or `0x` prefix
pub fn parse_color(raw: &str) -> Result<i64> {
    let hex = raw
        .trim_start_matches('#')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if hex.is_empty() || hex.len() > 8 {
        bail!("expected up to 8 hex digits, got {}", raw);
    }
    let value = u32::from_str_radix(hex, 16).with_context(|| format!("invalid color {}", raw))?;
    Ok(i64::from(value))
}

impl Command {
    /// Parse one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(None);
        };

        let command = match cmd {
            "tool" => {
                let raw = words.next().ok_or_else(|| anyhow!("missing pen|eraser"))?;
                Command::Tool(raw.parse().map_err(|_| anyhow!("unknown tool {}", raw))?)
            }
            "width" => {
                let raw = words.next().ok_or_else(|| anyhow!("missing <width>"))?;
                let width: f32 = raw.parse().with_context(|| format!("invalid width {}", raw))?;
                if !(width > 0.0 && width <= 1.0) {
                    bail!("width must be in (0, 1], got {}", width);
                }
                Command::Width(width)
            }
            "color" => Command::Color(parse_color(
                words.next().ok_or_else(|| anyhow!("missing <color>"))?,
            )?),
            "draw" => {
                let points = words.by_ref().map(parse_point).collect::<Result<Vec<_>>>()?;
                if points.is_empty() {
                    bail!("draw needs at least one point");
                }
                Command::Draw(points)
            }
            "connect" => Command::Connect,
            "disconnect" => Command::Disconnect,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command: {}", other),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument: {}", extra);
        }
        Ok(Some(command))
    }
}

/// Current pen settings plus the capture machine
pub struct Console {
    handle: ClientHandle,
    capture: StrokeCapture<OpSender>,
    tool: Tool,
    width: f32,
    color: i64,
}

impl Console {
    pub fn new(handle: ClientHandle) -> Self {
        Self {
            capture: handle.capture(),
            handle,
            tool: Tool::Pen,
            width: 0.004,
            color: 0xFF000000,
        }
    }

    /// Replay `points` as one gesture, timestamped [`SAMPLE_SPACING`] apart
    pub fn draw(&mut self, points: &[NormPoint], start: Instant) -> Option<String> {
        let (first, rest) = points.split_first()?;
        let stroke_id = self.capture.begin(*first, self.tool, self.width, self.color, start)?;
        for (i, point) in rest.iter().enumerate() {
            let at = start + SAMPLE_SPACING * (i as u32 + 1);
            self.capture.sample(*point, self.tool, self.width, at);
        }
        self.capture.end();
        Some(stroke_id)
    }

    /// Returns false on quit
    pub async fn execute(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Tool(tool) => {
                self.tool = tool;
                println!("tool: {}", tool.as_str());
            }
            Command::Width(width) => {
                self.width = width;
                println!("width: {}", width);
            }
            Command::Color(color) => {
                self.color = color;
                println!("color: {:08X}", color);
            }
            Command::Draw(points) => match self.draw(&points, Instant::now()) {
                Some(id) => println!("drew {} ({} points)", id, points.len()),
                None => println!("drawing not permitted"),
            },
            Command::Connect => self.handle.connect(),
            Command::Disconnect => self.handle.disconnect(),
            Command::Status => {
                let status = self.handle.status().await?;
                println!("user: {}", status.user_id);
                println!("connection: {} (attempt {})", status.state, status.attempt);
                println!("strokes: {}", status.strokes.len());
                match status.background {
                    Some(bg) => println!("background: {} page {}", bg.doc_id, bg.page),
                    None => println!("background: none"),
                }
                match status.last_global_seq {
                    Some(seq) => println!("last seq: {}", seq),
                    None => println!("last seq: -"),
                }
                println!("can draw: {}", status.can_draw);
                println!("sent: {}, dropped offline: {}", status.sent, status.dropped_offline);
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }
}

/// Read commands from stdin until EOF or `quit`
pub async fn run(handle: ClientHandle) -> Result<()> {
    let mut console = Console::new(handle.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Ok(Some(command)) => {
                if !console.execute(command).await? {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("{}\n{}", e, HELP),
        }
    }

    info!("Console closed");
    handle.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings() {
        assert_eq!(Command::parse("tool eraser").unwrap(), Some(Command::Tool(Tool::Eraser)));
        assert!(Command::parse("tool laser").is_err());
        assert_eq!(Command::parse("width 0.01").unwrap(), Some(Command::Width(0.01)));
        assert!(Command::parse("width 0").is_err());
        assert!(Command::parse("width wide").is_err());
        assert_eq!(Command::parse("color FF00FF00").unwrap(), Some(Command::Color(0xFF00FF00)));
        assert_eq!(Command::parse("color #ff0000ff").unwrap(), Some(Command::Color(0xFF0000FF)));
        assert!(Command::parse("color 123456789").is_err());
    }

    #[test]
    fn test_parse_draw() {
        assert_eq!(
            Command::parse("draw 0.1,0.2 0.3,0.4").unwrap(),
            Some(Command::Draw(vec![NormPoint::new(0.1, 0.2), NormPoint::new(0.3, 0.4)]))
        );
        assert!(Command::parse("draw").is_err());
        assert!(Command::parse("draw 0.1;0.2").is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("connect").unwrap(), Some(Command::Connect));
        assert_eq!(Command::parse("disconnect").unwrap(), Some(Command::Disconnect));
        assert_eq!(Command::parse("status").unwrap(), Some(Command::Status));
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
        assert!(Command::parse("status now").is_err());
    }
}
