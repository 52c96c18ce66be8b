//! Debug proxy for stdio MCP servers.
//!
//! Sits between a client and a real server, relays every line in both
//! directions unchanged, and writes a human-readable traffic log. The
//! server's stderr is captured into the log instead of the protocol stream.

pub mod config;
pub mod error;
pub mod log;
pub mod relay;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use log::{Direction, TrafficLog, LOG_HEADER};
pub use relay::{pump, run_proxy, ProxyLink, PumpEnd, RelayStats};
