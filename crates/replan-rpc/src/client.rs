//! Request/response JSON-RPC client over a [`MessageReader`] /
//! [`MessageWriter`] pair.
//!
//! One background task reads incoming messages and demultiplexes responses
//! to their waiters by request id. Callers block in [`RpcClient::send_request`]
//! until the matching response arrives or the per-request timeout elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::message::{Incoming, Request};
use crate::stream::{MessageReader, MessageWriter};

/// Default per-request timeout, matching the analyzer's worst-case full-repo
/// analysis pass.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// How long a single request may wait for its response.
    pub request_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type PendingSender = oneshot::Sender<Result<Value, RpcError>>;
type PendingMap = Arc<Mutex<HashMap<i64, PendingSender>>>;

/// A started JSON-RPC client.
///
/// The client has two states, started and stopped. [`RpcClient::stop`] closes
/// the write half, interrupts the reader task, and fails every pending waiter
/// with [`RpcError::Cancelled`].
pub struct RpcClient {
    writer: Mutex<Option<Box<dyn MessageWriter>>>,
    pending: PendingMap,
    id_counter: AtomicI64,
    request_timeout: Duration,
    cancel: CancellationToken,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("id_counter", &self.id_counter)
            .field("request_timeout", &self.request_timeout)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Start the client: spawns the reader task and accepts requests.
    pub fn start(
        reader: Box<dyn MessageReader>,
        writer: Box<dyn MessageWriter>,
        config: RpcClientConfig,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&pending), cancel.clone()));

        Self {
            writer: Mutex::new(Some(writer)),
            pending,
            id_counter: AtomicI64::new(1),
            request_timeout: config.request_timeout,
            cancel,
            reader_task: Mutex::new(Some(reader_task)),
        }
    }

    /// Send a request and wait for the matching response.
    ///
    /// On timeout the pending entry is removed and the late response, if any,
    /// is dropped by the reader. A JSON-RPC error response surfaces as
    /// [`RpcError::Server`]; neither failure stops the client.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        if self.cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(id, method, params);
        let message =
            serde_json::to_value(&request).map_err(|e| RpcError::Framing(e.to_string()))?;

        // Register the waiter before writing so a response cannot race past us.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                self.pending.lock().await.remove(&id);
                return Err(RpcError::Cancelled);
            };
            if let Err(e) = writer.send(&message).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        }
        debug!(id, method, "request sent");

        // Biased toward the response so a terminal error delivered through
        // the waiter wins over the cancellation flag when both are ready.
        tokio::select! {
            biased;
            outcome = tokio::time::timeout(self.request_timeout, rx) => match outcome {
                Ok(Ok(result)) => result,
                // Sender dropped without a verdict: the reader died abruptly.
                Ok(Err(_)) => Err(RpcError::Transport(
                    "reader task exited with the request pending".to_string(),
                )),
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    warn!(id, method, "request timed out");
                    Err(RpcError::Timeout(self.request_timeout))
                }
            },
            _ = self.cancel.cancelled() => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Cancelled)
            }
        }
    }

    /// Stop the client. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        // Dropping the writer closes the child's stdin.
        self.writer.lock().await.take();
        if let Some(task) = self.reader_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// Reader task: demultiplex incoming messages until EOF, transport failure,
/// or cancellation, then fail whatever is still pending.
async fn read_loop(mut reader: Box<dyn MessageReader>, pending: PendingMap, cancel: CancellationToken) {
    let terminal = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break RpcError::Cancelled,
            message = reader.recv() => message,
        };

        match message {
            Ok(Some(value)) => dispatch(value, &pending).await,
            Ok(None) => {
                break RpcError::Transport("analyzer stream closed".to_string());
            }
            Err(e) => break e,
        }
    };

    // Fail the waiters before flipping the cancellation flag so they see
    // the real terminal error rather than a generic cancellation.
    let waiters: Vec<PendingSender> = pending.lock().await.drain().map(|(_, tx)| tx).collect();
    if !waiters.is_empty() {
        debug!(count = waiters.len(), error = %terminal, "failing pending requests");
    }
    for tx in waiters {
        let _ = tx.send(Err(terminal.clone()));
    }
    cancel.cancel();
}

/// Route one incoming message to its waiter.
async fn dispatch(value: Value, pending: &PendingMap) {
    let incoming: Incoming = match serde_json::from_value(value) {
        Ok(incoming) => incoming,
        Err(e) => {
            warn!(error = %e, "discarding unintelligible message");
            return;
        }
    };

    match incoming {
        Incoming::Response(resp) => {
            if let Some(tx) = pending.lock().await.remove(&resp.id) {
                let _ = tx.send(Ok(resp.result));
            } else {
                warn!(id = resp.id, "late or unknown response dropped");
            }
        }
        Incoming::Error(err) => {
            if let Some(tx) = pending.lock().await.remove(&err.id) {
                let _ = tx.send(Err(RpcError::Server {
                    code: err.error.code,
                    message: err.error.message,
                }));
            } else {
                warn!(id = err.id, "late or unknown error response dropped");
            }
        }
        Incoming::Notification(note) => {
            debug!(method = %note.method, "server notification");
        }
    }
}
