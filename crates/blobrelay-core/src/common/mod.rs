//! Shared protocol bindings, record types and errors.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type surfaced to gRPC clients.
//! - [`types`] - Record identifiers, records and lookup results.
//! - [`codec`] - Transport encoding of payloads (standard base64).
//! - [`proto`] - Generated Protobuf messages and gRPC service bindings.

pub mod codec;
pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from
/// `proto/blobrelay.proto`.
///
/// ## Service
///
/// - `Store` - client streams base64 payloads, server streams back one
///   acknowledgement per frame carrying the assigned record id.
/// - `Retrieve` - client streams record ids, server streams back one frame per
///   id with either the base64 payload or a `not_found` status.
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
pub mod proto {
    tonic::include_proto!("blobrelay.v1");

    /// Encoded file descriptor set used to serve gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("blobrelay_descriptor");
}
