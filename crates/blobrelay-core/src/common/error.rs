//! Error types for the relay service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! that can end a Store or Retrieve call. It implements `From<Error>` for
//! `tonic::Status` so pipeline failures propagate to clients with a matching
//! gRPC status code.
//!
//! ## Error Cases
//! - `Decode`: A Store frame carried a payload that is not valid base64.
//! - `InvalidRequest`: A Retrieve frame carried an empty or malformed id.
//! - `Store`: The record store failed a create/get/delete/count.
//! - `IdCollision`: The id generator returned an id already in the store.
//! - `Transport`: The inbound stream yielded a gRPC error.
//! - `ChannelError`: An internal channel between pipeline stages failed.
//! - `RequestCancelled`: The client went away or the call was cancelled.
//! - `ServiceShutdown`: A call arrived while the server was draining.
//!
//! Not-found lookups are deliberately absent: they are a regular
//! [`Lookup::NotFound`](crate::types::Lookup::NotFound) result.

use std::error::Error as _;
use tonic::{Code, Status};

/// Result alias defaulting to the relay [`Error`]. Stream items that carry a
/// gRPC status use `Result<T, Status>`.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Prefix tonic puts on statuses built from HTTP/2 connection errors.
const H2_ERROR_PREFIX: &str = "h2 protocol error";

/// Unified error type for the relay service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The transport-encoded payload could not be decoded.
    #[error("Failed to decode payload: {reason}")]
    Decode { reason: String },

    /// The client request was invalid (empty or malformed record id).
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The backing record store failed.
    #[error("Store error: {context}")]
    Store { context: String },

    /// A freshly generated id already exists in the store.
    #[error("Record id collision: {id}")]
    IdCollision { id: String },

    /// The inbound request stream failed with a gRPC status.
    #[error("Transport error ({code:?}): {message}")]
    Transport { code: Code, message: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The client aborted the call.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` for terminations that are not failures of the call.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::RequestCancelled)
    }
}

/// Whether an inbound status means the client's connection went away rather
/// than the call failing.
///
/// An HTTP/2 error without a reason code (EOF, reset socket) reaches the
/// handler as `UNKNOWN` with tonic's h2 prefix and no source attached, so the
/// message is checked as well as the source chain.
fn is_connection_lost(status: &Status) -> bool {
    if status.code() != Code::Unknown {
        return false;
    }
    if status.message().starts_with(H2_ERROR_PREFIX) {
        return true;
    }
    let mut source = status.source();
    while let Some(err) = source {
        if err.is::<std::io::Error>() {
            return true;
        }
        source = err.source();
    }
    false
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Cancelled => Self::RequestCancelled,
            _ if is_connection_lost(&status) => Self::RequestCancelled,
            code => Self::Transport {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Decode { reason } => {
                Status::invalid_argument(format!("Failed to decode payload: {reason}"))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Store { context } => Status::internal(format!("Store error: {context}")),
            Error::IdCollision { id } => {
                Status::internal(format!("Record id collision: {id}"))
            }
            Error::Transport { code, message } => Status::new(code, message),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
