//! stdio transport for MCP server.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! # Concurrency
//!
//! Reading is done by a single [`MessageReader`] owned by the server loop.
//! Writing goes through a cloneable [`MessageWriter`]; every message is
//! serialised first and then written and flushed under one lock, so replies
//! from concurrent request workers never interleave.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::mcp::protocol::{parse_message, IncomingMessage, JsonRpcError};

/// Maximum bytes per JSON-RPC message (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Result of reading one framed message.
pub type Frame = Result<IncomingMessage, JsonRpcError>;

/// Reads newline-delimited JSON-RPC messages.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
    max_message_bytes: usize,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wraps a byte stream.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buffer: Vec::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Sets the size above which a message is rejected as a parse error.
    #[must_use]
    pub const fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Reads the next message line, without its line terminator.
    ///
    /// Returns `None` at end of stream. A final line without a trailing
    /// newline is still returned.
    ///
    /// This method is cancel safe: bytes read before cancellation stay in the
    /// internal buffer and are picked up by the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the stream fails.
    pub async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let bytes_read = self.reader.read_until(b'\n', &mut self.buffer).await?;

        if bytes_read == 0 && self.buffer.is_empty() {
            // EOF - stream closed
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with(b"\n") {
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Reads and parses the next message, skipping blank lines.
    ///
    /// Returns `Ok(None)` at end of stream. Malformed input yields
    /// `Ok(Some(Err(..)))` so the caller can reply and keep reading.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying stream fails.
    pub async fn read_next(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };

            if line.len() > self.max_message_bytes {
                tracing::warn!(
                    bytes = line.len(),
                    limit = self.max_message_bytes,
                    "Message too large"
                );
                return Ok(Some(Err(JsonRpcError::parse_error())));
            }

            let Ok(text) = std::str::from_utf8(&line) else {
                tracing::warn!("Message is not valid UTF-8");
                return Ok(Some(Err(JsonRpcError::parse_error())));
            };

            if text.trim().is_empty() {
                continue;
            }

            tracing::trace!(message = text, "Received message");
            return Ok(Some(parse_message(text)));
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serialised, exclusive writer for outgoing messages.
///
/// Clones share the same underlying stream and lock.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl MessageWriter {
    /// Wraps a byte sink.
    #[must_use]
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Serialises `message` and writes it as one newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails. A write failure
    /// means the client is gone.
    pub async fn send<T: Serialize>(&self, message: &T) -> io::Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.write_raw(&json).await
    }

    /// Writes a raw JSON string with newline termination.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    async fn write_raw(&self, json: &str) -> io::Result<()> {
        // MCP stdio framing: messages must not contain embedded newlines
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        tracing::trace!(message = json, "Sending message");
        let mut writer = self.inner.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        Ok(())
    }

    /// Flushes and shuts down the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be shut down.
    pub async fn close(&self) -> io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.flush().await?;
        writer.shutdown().await
    }
}

/// Creates a reader over stdin and a writer over stdout.
#[must_use]
pub fn stdio() -> (MessageReader<tokio::io::Stdin>, MessageWriter) {
    (
        MessageReader::new(tokio::io::stdin()),
        MessageWriter::new(tokio::io::stdout()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{ErrorCode, JsonRpcResponse, RequestId};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_lines_and_skips_blanks() {
        let input = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\r\n\n   \n")
            .read(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}")
            .build();
        let mut reader = MessageReader::new(input);

        let first = reader.read_next().await.unwrap().unwrap().unwrap();
        assert_eq!(first.id(), Some(&RequestId::from(1)));

        let second = reader.read_next().await.unwrap().unwrap().unwrap();
        assert_eq!(second.method(), "notifications/initialized");

        assert!(reader.read_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parse_errors_do_not_end_the_stream() {
        let input = tokio_test::io::Builder::new()
            .read(b"{not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .build();
        let mut reader = MessageReader::new(input);

        let err = reader.read_next().await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());

        let ok = reader.read_next().await.unwrap().unwrap().unwrap();
        assert_eq!(ok.method(), "ping");
    }

    #[tokio::test]
    async fn oversized_and_non_utf8_messages_are_parse_errors() {
        let input = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"a-very-long-method\"}\n")
            .read(b"\xff\xfe\n")
            .build();
        let mut reader = MessageReader::new(input).with_max_message_bytes(16);

        let err = reader.read_next().await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
        let err = reader.read_next().await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
    }

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        let (client, server) = tokio::io::duplex(64);
        let writer = MessageWriter::new(server);

        let mut handles = Vec::new();
        for i in 0..20_i64 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let response = JsonRpcResponse::success(
                    RequestId::from(i),
                    serde_json::json!({"payload": "x".repeat(200)}),
                );
                writer.send(&response).await.unwrap();
            }));
        }

        let reader = tokio::spawn(async move {
            let mut client = client;
            let mut out = String::new();
            client.read_to_string(&mut out).await.unwrap();
            out
        });

        for handle in handles {
            handle.await.unwrap();
        }
        writer.close().await.unwrap();
        drop(writer);

        let out = reader.await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 20);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["result"]["payload"].as_str().unwrap().len(), 200);
        }
    }

    #[tokio::test]
    async fn serialise_response_no_newlines() {
        // Verify our JSON serialisation doesn't produce embedded newlines
        let response = JsonRpcResponse::success(
            RequestId::from(1),
            serde_json::json!({
                "message": "hello\nworld",
                "nested": {"key": "value"}
            }),
        );

        let json = serde_json::to_string(&response).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }
}
