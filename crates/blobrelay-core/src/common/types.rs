//! # Record Types
//!
//! The data model shared by the server pipelines, the record store and the
//! clients.
//!
//! - [`RecordId`] - server-assigned identifier (a UUIDv7), rendered on the wire
//!   as its canonical hyphenated string.
//! - [`Record`] - an immutable `{id, payload}` pair.
//! - [`Lookup`] - tagged result of a store lookup. A missing record is
//!   [`Lookup::NotFound`], never an empty record.

use crate::Error;
use bytes::Bytes;
use core::{fmt, str::FromStr};
use uuid::Uuid;

/// Wire status for a successful frame.
pub const STATUS_OK: &str = "ok";

/// Wire status for a Retrieve miss.
pub const STATUS_NOT_FOUND: &str = "not_found";

/// Unique identifier of a stored record.
///
/// Ids are assigned by the server when a payload is stored; clients only ever
/// echo them back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new time-ordered id from the current clock and a random
    /// suffix.
    pub fn now_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// UTF-8 bytes of the canonical string form, as carried in
    /// `StoreResponse.id`.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "empty record id".to_string(),
            });
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidRequest {
                reason: format!("malformed record id `{s}`: {e}"),
            })
    }
}

/// A stored payload and the id it was stored under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub payload: Bytes,
}

impl Record {
    pub const fn new(id: RecordId, payload: Bytes) -> Self {
        Self { id, payload }
    }
}

/// Result of looking a record up by id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Found(Record),
    NotFound(RecordId),
}

impl Lookup {
    pub const fn id(&self) -> &RecordId {
        match self {
            Self::Found(record) => &record.id,
            Self::NotFound(id) => id,
        }
    }

    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}
