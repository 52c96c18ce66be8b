//! Traffic log for the debug proxy.
//!
//! Plain text, one entry per event, each starting with a direction tag.
//! JSON frames are pretty-printed on their own block; anything that does not
//! parse is logged as the raw line.

use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ProxyError;

/// First line of every traffic log.
pub const LOG_HEADER: &str = "=== MCP Proxy Debug Log ===";

/// What a log entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    /// A line the server wrote to stderr.
    ServerOutput,
    /// Proxy lifecycle events.
    Proxy,
}

impl Direction {
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "C->S",
            Direction::ServerToClient => "S->C",
            Direction::ServerOutput => "SERVER_OUTPUT",
            Direction::Proxy => "PROXY",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.tag())
    }
}

/// Format one log entry, without a trailing newline.
pub fn format_entry(direction: Direction, line: &str, pretty: bool) -> String {
    match direction {
        Direction::ClientToServer | Direction::ServerToClient => {
            match serde_json::from_str::<Value>(line) {
                Ok(value) if pretty => {
                    let body = serde_json::to_string_pretty(&value).unwrap_or_else(|_| line.to_string());
                    format!("\n{direction} {body}")
                }
                _ => format!("{direction} {line}"),
            }
        }
        Direction::ServerOutput => format!("{direction} {}", line.trim()),
        Direction::Proxy => format!("{direction} {line}"),
    }
}

/// Append-only traffic log shared by the relay tasks.
pub struct TrafficLog {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
    pretty: bool,
    mirror_to_stderr: bool,
}

impl TrafficLog {
    /// Create (or truncate) the log file and write the header.
    pub fn create(path: impl AsRef<Path>, pretty: bool, mirror_to_stderr: bool) -> Result<Self, ProxyError> {
        let path = path.as_ref().to_path_buf();
        let log_err = |source| ProxyError::Log {
            path: path.clone(),
            source,
        };

        let mut writer = BufWriter::new(File::create(&path).map_err(log_err)?);
        writeln!(writer, "{LOG_HEADER}").map_err(log_err)?;
        writer.flush().map_err(log_err)?;

        let log = Self {
            file: Mutex::new(writer),
            path,
            pretty,
            mirror_to_stderr,
        };
        log.proxy(format!("log opened at {}", chrono::Local::now().to_rfc3339()));
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one event. Failures to write the log are reported through
    /// `tracing` and never interrupt the relay.
    pub fn record(&self, direction: Direction, line: &str) {
        let entry = format_entry(direction, line, self.pretty);
        tracing::debug!(direction = direction.tag(), "{line}");

        if self.mirror_to_stderr {
            eprintln!("{entry}");
        }

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{entry}").and_then(|_| file.flush()) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write traffic log");
        }
    }

    /// Record a `[PROXY]` lifecycle entry.
    pub fn proxy(&self, message: impl fmt::Display) {
        self.record(Direction::Proxy, &message.to_string());
    }
}
