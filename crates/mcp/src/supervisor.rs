//! Server process supervision.
//!
//! Spawns a tool server as a child process with piped stdio and owns its
//! lifecycle. The pipes are handed out exactly once, as frame readers and
//! writers, so nothing else ever touches the raw handles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::McpError;
use crate::transport::{FrameReader, FrameSource, FrameWriter, LineTransport};

/// How to launch a server: `program args...`, inheriting the environment
/// with `env` layered on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable command line, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Where the child's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrMode {
    /// Share this process's stderr.
    Inherit,
    /// Pipe it; the caller must drain it (see [`drain_stderr`]).
    Piped,
    Null,
}

pub type ChildReader = FrameReader<BufReader<ChildStdout>>;
pub type ChildWriter = FrameWriter<ChildStdin>;
pub type StderrReader = FrameReader<BufReader<ChildStderr>>;
pub type ChildTransport = LineTransport<BufReader<ChildStdout>, ChildStdin>;

/// A running server child process.
///
/// The child is killed if this handle is dropped while it is still running.
pub struct ServerProcess {
    child: Child,
    label: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ServerProcess {
    /// Spawn the server. Must be called inside a tokio runtime.
    pub fn spawn(command: &ServerCommand, stderr: StderrMode) -> Result<Self, McpError> {
        let label = command.display();
        tracing::info!(command = %label, "spawning server process");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(match stderr {
                StderrMode::Inherit => Stdio::inherit(),
                StderrMode::Piped => Stdio::piped(),
                StderrMode::Null => Stdio::null(),
            })
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        tracing::debug!(pid = ?child.id(), "server process started");

        Ok(Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            label,
        })
    }

    /// OS process id, while the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Writer for the child's stdin. Available once.
    pub fn take_stdin(&mut self) -> Result<ChildWriter, McpError> {
        self.stdin
            .take()
            .map(FrameWriter::new)
            .ok_or_else(|| McpError::ServerUnavailable("server stdin already taken".to_string()))
    }

    /// Line reader for the child's stdout. Available once.
    pub fn take_stdout(&mut self) -> Result<ChildReader, McpError> {
        self.stdout
            .take()
            .map(FrameReader::buffered)
            .ok_or_else(|| McpError::ServerUnavailable("server stdout already taken".to_string()))
    }

    /// Line reader for the child's stderr, if it was spawned with
    /// [`StderrMode::Piped`] and not taken yet.
    pub fn take_stderr(&mut self) -> Option<StderrReader> {
        self.stderr.take().map(FrameReader::buffered)
    }

    /// Both protocol pipes as one transport.
    pub fn transport(&mut self) -> Result<ChildTransport, McpError> {
        let writer = self.take_stdin()?;
        let reader = self.take_stdout()?;
        Ok(LineTransport::from_parts(reader, writer))
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, McpError> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the child to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus, McpError> {
        self.stdin.take();
        Ok(self.child.wait().await?)
    }

    /// Kill the child (if still running) and reap it.
    pub async fn terminate(&mut self) -> Result<ExitStatus, McpError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        tracing::info!(command = %self.label, "terminating server process");
        self.child.start_kill()?;
        Ok(self.child.wait().await?)
    }

    /// Close stdin (if it was never handed out), give the child `grace` to
    /// exit, then kill it. A handed-out writer must be closed by its owner.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus, McpError> {
        self.stdin.take();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                tracing::warn!(command = %self.label, ?grace, "server did not exit in time");
                self.terminate().await
            }
        }
    }
}

/// Drain a child's stderr on a background task, logging each line.
///
/// Keeps the pipe from filling up and blocking the child.
pub fn drain_stderr(mut stderr: StderrReader, label: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match stderr.receive().await {
                Ok(Some(line)) => tracing::debug!(server = %label, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(server = %label, error = %e, "stderr read failed");
                    break;
                }
            }
        }
    })
}
