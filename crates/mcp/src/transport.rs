//! MCP transport layer.
//!
//! A transport moves newline-delimited frames. It is split into a
//! [`FrameSource`] (read side) and a [`FrameSink`] (write side) so that a
//! client can read on a background task while callers write; [`McpTransport`]
//! is a connection that owns both halves.
//!
//! [`LineTransport`] works over any byte stream pair: the process's own
//! stdin/stdout ([`StdioTransport`]) or a child's pipes. [`ChannelTransport`]
//! is an in-memory pair for tests.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::codec::{self, Message};
use crate::error::McpError;

/// Read side of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next non-blank line, without its terminator.
    /// Returns `None` when the transport is closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Read and decode the next frame.
    ///
    /// A line that fails to decode yields `Err(McpError::MalformedMessage)`;
    /// the transport stays usable and the caller may simply read again.
    async fn read_frame(&mut self) -> Result<Option<Message>, McpError> {
        match self.receive().await? {
            Some(line) => codec::decode(&line).map(Some),
            None => Ok(None),
        }
    }
}

/// Write side of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one line followed by `\n`, then flush.
    async fn send(&mut self, line: &str) -> Result<(), McpError>;

    /// Encode and write one frame.
    async fn write_frame(&mut self, message: &Message) -> Result<(), McpError> {
        let line = codec::to_line(message)?;
        self.send(&line).await
    }

    /// Signal end-of-stream to the peer.
    async fn close(&mut self) -> Result<(), McpError> {
        Ok(())
    }
}

/// A bidirectional connection that can be split into its two halves.
pub trait McpTransport: FrameSource + FrameSink {
    type Source: FrameSource + 'static;
    type Sink: FrameSink + 'static;

    fn into_split(self) -> (Self::Source, Self::Sink);
}

// ── Byte-stream halves ──────────────────────────────────────────────

/// Line reader over any buffered byte stream.
///
/// Partial lines are kept across calls, so a `receive` future dropped mid-line
/// (e.g. inside `tokio::select!`) loses nothing. Invalid UTF-8 is replaced
/// rather than rejected.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Read the next line, blank lines included. `None` at end-of-stream.
    pub async fn read_raw_line(&mut self) -> Result<Option<String>, McpError> {
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }
}

impl<R> FrameReader<BufReader<R>>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    /// Wrap an unbuffered stream.
    pub fn buffered(reader: R) -> Self {
        Self::new(BufReader::new(reader))
    }
}

#[async_trait]
impl<R> FrameSource for FrameReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        loop {
            match self.read_raw_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

/// Line writer over any byte sink. Every write is flushed.
///
/// `close` shuts the sink down and drops it, so a `ChildStdin` releases its
/// pipe and the child sees end-of-file.
pub struct FrameWriter<W> {
    writer: Option<W>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

#[async_trait]
impl<W> FrameSink for FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, line: &str) -> Result<(), McpError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| McpError::ConnectionLost("writer closed locally".to_string()))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        let result = writer.shutdown().await;
        drop(writer);
        result?;
        Ok(())
    }
}

// ── Whole transports ────────────────────────────────────────────────

/// A reader/writer pair speaking newline-delimited JSON.
pub struct LineTransport<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    pub fn from_parts(reader: FrameReader<R>, writer: FrameWriter<W>) -> Self {
        Self { reader, writer }
    }
}

/// Stdio-based transport: reads this process's stdin, writes its stdout.
pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Create a new stdio transport.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> FrameSource for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        self.reader.receive().await
    }
}

#[async_trait]
impl<R, W> FrameSink for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, line: &str) -> Result<(), McpError> {
        self.writer.send(line).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.writer.close().await
    }
}

impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Source = FrameReader<R>;
    type Sink = FrameWriter<W>;

    fn into_split(self) -> (Self::Source, Self::Sink) {
        (self.reader, self.writer)
    }
}

// ── In-memory transport ─────────────────────────────────────────────

/// Receiving half of a [`ChannelTransport`].
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

/// Sending half of a [`ChannelTransport`]. Closing drops the sender.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<String>>,
}

/// In-memory transport for testing, backed by channel pairs.
pub struct ChannelTransport {
    source: ChannelSource,
    sink: ChannelSink,
}

impl ChannelTransport {
    /// Create a pair of connected transports for testing.
    ///
    /// Messages sent on one transport are received by the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(32);
        let (tx_b, rx_a) = mpsc::channel(32);
        (
            Self {
                source: ChannelSource { rx: rx_a },
                sink: ChannelSink { tx: Some(tx_a) },
            },
            Self {
                source: ChannelSource { rx: rx_b },
                sink: ChannelSink { tx: Some(tx_b) },
            },
        )
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, line: &str) -> Result<(), McpError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| McpError::ConnectionLost("channel closed locally".to_string()))?;
        tx.send(line.to_string())
            .await
            .map_err(|_| McpError::ConnectionLost("channel peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        self.source.receive().await
    }
}

#[async_trait]
impl FrameSink for ChannelTransport {
    async fn send(&mut self, line: &str) -> Result<(), McpError> {
        self.sink.send(line).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.sink.close().await
    }
}

impl McpTransport for ChannelTransport {
    type Source = ChannelSource;
    type Sink = ChannelSink;

    fn into_split(self) -> (Self::Source, Self::Sink) {
        (self.source, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcNotification, RpcId};

    #[tokio::test]
    async fn test_channel_transport_pair() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send("hello from a").await.unwrap();
        let msg = b.receive().await.unwrap();
        assert_eq!(msg, Some("hello from a".to_string()));

        b.send("hello from b").await.unwrap();
        let msg = a.receive().await.unwrap();
        assert_eq!(msg, Some("hello from b".to_string()));
    }

    #[tokio::test]
    async fn test_channel_transport_closed() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        let result = a.receive().await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_channel_close_signals_eof() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.close().await.unwrap();
        assert_eq!(b.receive().await.unwrap(), None);
        assert!(matches!(
            a.send("late").await,
            Err(McpError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_line_transport_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut client = LineTransport::new(BufReader::new(client_read), client_write);
        let mut server = LineTransport::new(BufReader::new(server_read), server_write);

        let note = Message::Notification(JsonRpcNotification::new("notifications/initialized", None));
        client.write_frame(&note).await.unwrap();
        assert_eq!(server.read_frame().await.unwrap(), Some(note));

        server.send(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).await.unwrap();
        let frame = client.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.id(), Some(&RpcId::Number(7)));

        server.close().await.unwrap();
        assert_eq!(client.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_writer_close_releases_the_stream() {
        let (near, far) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(near);
        let mut reader = FrameReader::buffered(far);

        writer.send("last words").await.unwrap();
        writer.close().await.unwrap();
        assert!(writer.is_closed());
        // A second close is a no-op.
        writer.close().await.unwrap();

        assert_eq!(reader.receive().await.unwrap().as_deref(), Some("last words"));
        assert_eq!(reader.receive().await.unwrap(), None);
        assert!(matches!(
            writer.send("too late").await,
            Err(McpError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines_and_survives_garbage() {
        let input: &[u8] = b"\n  \r\n{oops\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\r\n";
        let mut reader = FrameReader::new(input);

        assert!(matches!(
            reader.read_frame().await,
            Err(McpError::MalformedMessage(_))
        ));
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.method(), Some("ping"));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_returns_unterminated_last_line() {
        let input: &[u8] = b"first\nsecond";
        let mut reader = FrameReader::new(input);
        assert_eq!(reader.receive().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.receive().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_replaces_invalid_utf8() {
        let input: &[u8] = b"caf\xff\n";
        let mut reader = FrameReader::new(input);
        assert_eq!(reader.receive().await.unwrap().as_deref(), Some("caf\u{fffd}"));
    }
}
