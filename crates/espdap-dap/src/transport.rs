//! DAP wire framing
//!
//! Content-Length framed JSON over any byte stream, server-directional:
//! read requests, write responses and events. Outgoing sequence numbers are
//! assigned at write time so concurrent request handlers cannot interleave
//! them out of order.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::ProtocolMessage;

/// Reads framed DAP messages from the editor.
pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read one message; `Ok(None)` on a clean EOF.
    pub async fn read_message(&mut self) -> Result<Option<ProtocolMessage>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|_| {
                    Error::Protocol(format!("invalid Content-Length: {value}"))
                })?);
            }
        }

        let length = content_length
            .ok_or_else(|| Error::Protocol("missing Content-Length header".to_string()))?;

        let mut buffer = vec![0u8; length];
        self.reader.read_exact(&mut buffer).await?;
        let content = String::from_utf8(buffer)?;
        trace!(message = %content, "received DAP message");

        let message: ProtocolMessage = serde_json::from_str(&content)?;
        Ok(Some(message))
    }
}

/// Writes framed DAP messages to the editor, stamping sequence numbers.
pub struct MessageWriter<W> {
    writer: W,
    next_seq: AtomicI64,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_seq: AtomicI64::new(1),
        }
    }

    pub async fn write_message(&mut self, mut message: ProtocolMessage) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        match &mut message {
            ProtocolMessage::Response(r) => r.seq = seq,
            ProtocolMessage::Event(e) => e.seq = seq,
            ProtocolMessage::Request(r) => r.seq = seq,
        }

        let json = serde_json::to_string(&message)?;
        let framed = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
        self.writer.write_all(framed.as_bytes()).await?;
        self.writer.flush().await?;
        trace!(message = %json, "sent DAP message");
        Ok(())
    }
}
