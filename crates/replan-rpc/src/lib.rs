//! JSON-RPC plumbing for long-lived analysis child processes.
//!
//! The analyzer server speaks line-free "bare JSON" JSON-RPC over its
//! stdin/stdout. This crate provides the two layers the supervisor builds
//! on: message framing ([`stream`]) and a correlating request/response
//! client with per-request timeouts ([`client`]).

pub mod client;
pub mod error;
pub mod message;
pub mod stream;

pub use client::{DEFAULT_REQUEST_TIMEOUT, RpcClient, RpcClientConfig};
pub use error::RpcError;
pub use message::{ErrorObject, ErrorResponse, Incoming, Notification, Request, Response};
pub use stream::{BareJsonReader, BareJsonWriter, MessageReader, MessageWriter};
