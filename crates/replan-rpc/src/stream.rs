//! Bare-JSON message framing over a byte-duplex pair.
//!
//! The analyzer child speaks JSON-RPC as a plain sequence of top-level JSON
//! values on its stdio, with nothing but optional whitespace between them.
//! [`BareJsonReader`] decodes that sequence incrementally, so values need not
//! be newline-aligned; [`BareJsonWriter`] writes one serialized value per
//! message. The two halves are independent and can live on different tasks.
//!
//! Framing is pluggable through [`MessageReader`] / [`MessageWriter`], so a
//! header-framed codec could be slotted in without touching the client.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RpcError;

/// Receive half of a message framing.
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next message. `Ok(None)` means the stream ended cleanly
    /// between messages.
    async fn recv(&mut self) -> Result<Option<Value>, RpcError>;
}

/// Send half of a message framing. Writes are atomic per message.
#[async_trait]
pub trait MessageWriter: Send {
    async fn send(&mut self, message: &Value) -> Result<(), RpcError>;
}

// Object safety: the client stores both halves as boxed trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn MessageReader, _: &dyn MessageWriter) {}
};

const READ_CHUNK: usize = 8 * 1024;

/// Decodes a stream of bare top-level JSON values, skipping inter-message
/// whitespace.
pub struct BareJsonReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R> BareJsonReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }
}

/// Try to decode one complete JSON value from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a prefix of a value (more
/// bytes are needed). On success the consumed bytes, including leading
/// whitespace, are drained.
fn try_decode(buf: &mut Vec<u8>) -> Result<Option<Value>, RpcError> {
    let start = match buf.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(pos) => pos,
        None => {
            buf.clear();
            return Ok(None);
        }
    };

    let mut values = serde_json::Deserializer::from_slice(&buf[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => {
            let consumed = start + values.byte_offset();
            buf.drain(..consumed);
            Ok(Some(value))
        }
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(RpcError::Framing(e.to_string())),
        None => Ok(None),
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for BareJsonReader<R> {
    async fn recv(&mut self) -> Result<Option<Value>, RpcError> {
        loop {
            if let Some(value) = try_decode(&mut self.buf)? {
                return Ok(Some(value));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(|e| RpcError::Transport(e.to_string()))?;

            if n == 0 {
                // EOF. A leftover partial value means the peer died mid-frame.
                if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                return Err(RpcError::Framing(
                    "stream ended inside a JSON value".to_string(),
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Writes one serialized JSON value per message, newline-terminated so the
/// stream stays line-greppable. The whole message goes out in a single
/// `write_all`.
pub struct BareJsonWriter<W> {
    inner: W,
}

impl<W> BareJsonWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for BareJsonWriter<W> {
    async fn send(&mut self, message: &Value) -> Result<(), RpcError> {
        let mut payload =
            serde_json::to_vec(message).map_err(|e| RpcError::Framing(e.to_string()))?;
        payload.push(b'\n');
        self.inner
            .write_all(&payload)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}
