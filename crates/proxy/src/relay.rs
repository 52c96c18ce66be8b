//! Line relay between a client and a spawned server.
//!
//! Three tasks make independent progress: client input to server stdin,
//! server stdout to client output, and server stderr to the traffic log.
//! Frames are forwarded as received; the relay never decodes them.

use mcpipe_mcp::{FrameSink, FrameSource, McpError, ServerCommand, ServerProcess, StderrMode};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::log::{Direction, TrafficLog};

/// Why one direction of the relay stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// The reading side reached end-of-stream.
    Eof,
    ReadFailed(McpError),
    /// The writing side is gone; treated as connection loss.
    WriteFailed(McpError),
}

/// Counters reported when the relay finishes.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub client_to_server: u64,
    pub server_to_client: u64,
    pub server_output: u64,
    pub exit_status: Option<ExitStatus>,
}

/// Copy lines from `source` to `sink`, logging each one, until either side
/// stops. Returns the number of lines forwarded.
pub async fn pump<S, K>(
    source: &mut S,
    sink: &mut K,
    direction: Direction,
    log: &TrafficLog,
) -> (u64, PumpEnd)
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
{
    let mut forwarded = 0;
    loop {
        let line = match source.receive().await {
            Ok(Some(line)) => line,
            Ok(None) => return (forwarded, PumpEnd::Eof),
            Err(e) => {
                log.proxy(format!("{} read error: {e}", direction.tag()));
                return (forwarded, PumpEnd::ReadFailed(e));
            }
        };

        log.record(direction, &line);
        if let Err(e) = sink.send(&line).await {
            log.proxy(format!("{} write failed, connection lost: {e}", direction.tag()));
            return (forwarded, PumpEnd::WriteFailed(e));
        }
        forwarded += 1;
    }
}

/// A relay between one client (the upstream halves) and one server process.
pub struct ProxyLink<S, K> {
    upstream_in: S,
    upstream_out: K,
    log: Arc<TrafficLog>,
    grace: Duration,
}

impl<S, K> ProxyLink<S, K>
where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
{
    pub fn new(upstream_in: S, upstream_out: K, log: Arc<TrafficLog>) -> Self {
        Self {
            upstream_in,
            upstream_out,
            log,
            grace: Duration::from_secs(2),
        }
    }

    /// How long the server gets to finish after the client goes away.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Relay until either side closes, then make sure the server is gone.
    pub async fn run(self, mut process: ServerProcess) -> Result<RelayStats, ProxyError> {
        let Self {
            mut upstream_in,
            mut upstream_out,
            log,
            grace,
        } = self;

        let mut child_in = process.take_stdin()?;
        let mut child_out = process.take_stdout()?;
        let mut stats = RelayStats::default();

        let mut stderr_task: Option<JoinHandle<u64>> = process.take_stderr().map(|mut stderr| {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut lines = 0;
                while let Ok(Some(line)) = stderr.receive().await {
                    log.record(Direction::ServerOutput, &line);
                    lines += 1;
                }
                lines
            })
        });

        // Owns the server's stdin; dropping it at the end closes the pipe.
        let mut upstream: JoinHandle<(u64, PumpEnd)> = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                pump(&mut upstream_in, &mut child_in, Direction::ClientToServer, &log).await
            })
        };
        let mut downstream: JoinHandle<(u64, PumpEnd)> = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                pump(&mut child_out, &mut upstream_out, Direction::ServerToClient, &log).await
            })
        };

        log.proxy("relay started");

        let server_closed_first = tokio::select! {
            joined = &mut upstream => {
                let (count, end) = joined.unwrap_or((0, PumpEnd::Eof));
                stats.client_to_server = count;
                log.proxy(format!("client side finished ({end:?}), closed server input"));

                match tokio::time::timeout(grace, &mut downstream).await {
                    Ok(joined) => {
                        if let Ok((count, _)) = joined {
                            stats.server_to_client = count;
                        }
                    }
                    Err(_) => {
                        log.proxy(format!("server still writing after {grace:?}, stopping relay"));
                        downstream.abort();
                    }
                }
                false
            }
            joined = &mut downstream => {
                let (count, end) = joined.unwrap_or((0, PumpEnd::Eof));
                stats.server_to_client = count;
                log.proxy(format!("server side finished ({end:?})"));
                upstream.abort();
                true
            }
        };

        let status = if server_closed_first {
            process.terminate().await?
        } else {
            process.shutdown(grace).await?
        };
        log.proxy(format!("server exited: {status}"));
        stats.exit_status = Some(status);

        if let Some(task) = stderr_task.take() {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(lines)) => stats.server_output = lines,
                _ => log.proxy("server stderr did not close"),
            }
        }

        log.proxy(format!(
            "shutdown: {} frames client->server, {} frames server->client, {} stderr lines",
            stats.client_to_server, stats.server_to_client, stats.server_output
        ));
        Ok(stats)
    }
}

/// Spawn `command` with piped stderr and relay between it and the client.
pub async fn run_proxy<S, K>(
    config: &ProxyConfig,
    command: &ServerCommand,
    upstream_in: S,
    upstream_out: K,
) -> Result<RelayStats, ProxyError>
where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
{
    let log = Arc::new(TrafficLog::create(
        &config.log_file,
        config.pretty,
        config.mirror_to_stderr,
    )?);
    log.proxy(format!("starting server: {}", command.display()));

    let process = match ServerProcess::spawn(command, StderrMode::Piped) {
        Ok(process) => process,
        Err(e) => {
            log.proxy(format!("failed to start server: {e}"));
            return Err(e.into());
        }
    };

    ProxyLink::new(upstream_in, upstream_out, log)
        .with_grace(config.shutdown_grace())
        .run(process)
        .await
}
