//! Operator console on stdin

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use classboard_core::types::{BgGoto, BgSet, DrawPermit};
use classboard_core::BoardOp;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::quic_server::HostHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Permit { user: String, allowed: bool },
    Background {
        doc_id: String,
        page: i32,
        w: i32,
        h: i32,
        file: PathBuf,
        page_count: Option<i32>,
    },
    ClearBackground,
    Goto { page: i32 },
    Start,
    Stop,
    Status,
    Help,
}

pub const HELP: &str = "\
commands:
  permit <user> on|off
  bg <docId> <page> <w> <h> <file> [pageCount]
  bgclear
  goto <page>
  start | stop | status | help";

fn number(arg: Option<&str>, name: &str) -> Result<i32> {
    let raw = arg.ok_or_else(|| anyhow!("missing <{}>", name))?;
    raw.parse().with_context(|| format!("invalid <{}>: {}", name, raw))
}

impl Command {
    /// Parse one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(None);
        };

        let command = match cmd {
            "permit" => {
                let user = words.next().ok_or_else(|| anyhow!("missing <user>"))?;
                let allowed = match words.next() {
                    Some("on") => true,
                    Some("off") => false,
                    other => bail!("expected on|off, got {:?}", other.unwrap_or("")),
                };
                Command::Permit {
                    user: user.to_string(),
                    allowed,
                }
            }
            "bg" => {
                let doc_id = words.next().ok_or_else(|| anyhow!("missing <docId>"))?.to_string();
                let page = number(words.next(), "page")?;
                let w = number(words.next(), "w")?;
                let h = number(words.next(), "h")?;
                let file = PathBuf::from(words.next().ok_or_else(|| anyhow!("missing <file>"))?);
                let page_count = match words.next() {
                    Some(raw) => Some(number(Some(raw), "pageCount")?),
                    None => None,
                };
                Command::Background {
                    doc_id,
                    page,
                    w,
                    h,
                    file,
                    page_count,
                }
            }
            "bgclear" => Command::ClearBackground,
            "goto" => Command::Goto {
                page: number(words.next(), "page")?,
            },
            "start" => Command::Start,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            other => bail!("unknown command: {}", other),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument: {}", extra);
        }
        Ok(Some(command))
    }
}

/// Image format tag from the file extension
pub fn image_format(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpeg" => "jpg".to_string(),
        "" => "png".to_string(),
        _ => ext,
    }
}

async fn execute(handle: &HostHandle, command: Command) -> Result<()> {
    match command {
        Command::Permit { user, allowed } => {
            let seq = handle
                .publish(BoardOp::DrawPermit(DrawPermit { user_id: user.clone(), allowed }))
                .await?;
            println!("permit {} {} (seq {})", user, if allowed { "on" } else { "off" }, seq);
        }
        Command::Background {
            doc_id,
            page,
            w,
            h,
            file,
            page_count,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let bg = BgSet::from_image(doc_id, page, (w, h), page_count, image_format(&file), &data);
            let seq = handle.publish(BoardOp::BgSet(bg)).await?;
            println!("background set, {} bytes (seq {})", data.len(), seq);
        }
        Command::ClearBackground => {
            let seq = handle.publish(BoardOp::BgClear).await?;
            println!("background cleared (seq {})", seq);
        }
        Command::Goto { page } => {
            let seq = handle.publish(BoardOp::BgGoto(BgGoto { page })).await?;
            println!("page {} (seq {})", page, seq);
        }
        Command::Start => handle.start(),
        Command::Stop => handle.stop(),
        Command::Status => {
            let status = handle.status().await?;
            println!("session: {}", status.state);
            println!("participants ({}): {}", status.participants.len(), status.participants.join(", "));
            println!("strokes: {}", status.strokes);
            println!("last seq: {}", status.last_seq);
            match status.background_page {
                Some(page) => println!("background: page {}", page),
                None => println!("background: none"),
            }
            println!("dropped batches: {}", status.dropped_batches);
        }
        Command::Help => println!("{}", HELP),
    }
    Ok(())
}

/// Read commands from stdin until EOF
pub async fn run(handle: HostHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Ok(Some(command)) => {
                if let Err(e) = execute(&handle, command).await {
                    warn!("Command failed: {:#}", e);
                }
            }
            Ok(None) => {}
            Err(e) => println!("{}\n{}", e, HELP),
        }
    }
    info!("Console closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_permit() {
        assert_eq!(
            Command::parse("permit bob off").unwrap(),
            Some(Command::Permit {
                user: "bob".into(),
                allowed: false
            })
        );
        assert!(Command::parse("permit bob maybe").is_err());
        assert!(Command::parse("permit").is_err());
    }

    #[test]
    fn test_parse_background() {
        assert_eq!(
            Command::parse("bg deck 2 1280 720 slides/p2.png 12").unwrap(),
            Some(Command::Background {
                doc_id: "deck".into(),
                page: 2,
                w: 1280,
                h: 720,
                file: PathBuf::from("slides/p2.png"),
                page_count: Some(12),
            })
        );
        let Some(Command::Background { page_count, .. }) = Command::parse("bg d 0 1 1 a.jpg").unwrap() else {
            panic!("expected background");
        };
        assert_eq!(page_count, None);
        assert!(Command::parse("bg d zero 1 1 a.jpg").is_err());
        assert!(Command::parse("bg d 0 1 1").is_err());
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(Command::parse("bgclear").unwrap(), Some(Command::ClearBackground));
        assert_eq!(Command::parse("goto 3").unwrap(), Some(Command::Goto { page: 3 }));
        assert_eq!(Command::parse("start").unwrap(), Some(Command::Start));
        assert_eq!(Command::parse("stop").unwrap(), Some(Command::Stop));
        assert_eq!(Command::parse("status").unwrap(), Some(Command::Status));
        assert!(Command::parse("stop now").is_err());
        assert!(Command::parse("laser").is_err());
    }

    #[test]
    fn test_image_format() {
        assert_eq!(image_format(Path::new("a/b.PNG")), "png");
        assert_eq!(image_format(Path::new("page.jpeg")), "jpg");
        assert_eq!(image_format(Path::new("page.webp")), "webp");
        assert_eq!(image_format(Path::new("raw")), "png");
    }
}
