//! Record store and id generator contracts.
//!
//! The relay pipelines treat persistence as a black box behind
//! [`RecordStore`]. Every operation is async and fallible; a lookup miss is a
//! regular [`Lookup::NotFound`] result rather than an error or an empty record.
//!
//! Ids are minted by an [`IdGenerator`] owned by the ingest pipeline and handed
//! to the store together with the payload. A store must refuse to overwrite an
//! existing id ([`Error::IdCollision`]).
//!
//! [`Error::IdCollision`]: blobrelay_core::Error::IdCollision

pub mod memory;

use blobrelay_core::{
    Result,
    types::{Lookup, Record, RecordId},
};

pub use memory::MemoryStore;

/// Durable id to payload mapping shared by every call.
///
/// Implementations must be safe to call from many calls concurrently; each
/// operation is expected to be atomic per record.
pub trait RecordStore: Send + Sync + 'static {
    /// Persists `record` and returns the id it is stored under.
    fn create(&self, record: Record) -> impl Future<Output = Result<RecordId>> + Send;

    /// Looks up the record stored under `id`.
    fn get(&self, id: RecordId) -> impl Future<Output = Result<Lookup>> + Send;

    /// Deletes the record stored under `id`. Returns whether a record existed.
    fn delete(&self, id: RecordId) -> impl Future<Output = Result<bool>> + Send;

    /// Deletes every record. Returns how many were removed.
    fn delete_all(&self) -> impl Future<Output = Result<usize>> + Send;

    /// Number of stored records.
    fn count(&self) -> impl Future<Output = Result<usize>> + Send;
}

/// Source of record ids that are unique for the lifetime of the store.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> RecordId;
}

/// Default generator: time-ordered UUIDv7 ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidV7Ids;

impl IdGenerator for UuidV7Ids {
    fn next_id(&self) -> RecordId {
        RecordId::now_v7()
    }
}
