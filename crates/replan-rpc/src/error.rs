use std::time::Duration;

/// Errors surfaced by the RPC stream and client layers.
///
/// `Timeout` and `Server` fail a single call and leave the client usable;
/// `Framing`, `Transport`, and `Cancelled` are terminal for the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The byte stream could not be decoded into a JSON-RPC message.
    #[error("framing error: {0}")]
    Framing(String),

    /// No response arrived within the per-request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying transport failed (stream closed, child died).
    #[error("transport error: {0}")]
    Transport(String),

    /// The client was stopped while the request was pending.
    #[error("rpc client stopped")]
    Cancelled,

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
}
