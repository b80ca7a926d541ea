use super::RecordStore;
use blobrelay_core::{
    Error, Result,
    types::{Lookup, Record, RecordId},
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, hash_map::Entry};

/// In-process [`RecordStore`] backed by a hash map.
///
/// Payloads are kept as [`Bytes`], so a lookup hands out a cheap reference to
/// the stored buffer instead of a copy, and every lookup gets its own
/// [`Record`]. The lock is only held for the map operation itself, never
/// across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordId, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    async fn create(&self, record: Record) -> Result<RecordId> {
        match self.records.write().entry(record.id) {
            Entry::Occupied(_) => Err(Error::IdCollision {
                id: record.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.payload);
                Ok(record.id)
            }
        }
    }

    async fn get(&self, id: RecordId) -> Result<Lookup> {
        let lookup = match self.records.read().get(&id) {
            Some(payload) => Lookup::Found(Record::new(id, payload.clone())),
            None => Lookup::NotFound(id),
        };
        Ok(lookup)
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        Ok(self.records.write().remove(&id).is_some())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut records = self.records.write();
        let removed = records.len();
        records.clear();
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &'static [u8]) -> Record {
        Record::new(RecordId::now_v7(), Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn create_then_get_returns_the_payload() {
        let store = MemoryStore::new();
        let rec = record(b"HELLO");
        let id = store.create(rec.clone()).await.unwrap();
        assert_eq!(id, rec.id);
        assert_eq!(store.get(id).await.unwrap(), Lookup::Found(rec));
    }

    #[tokio::test]
    async fn missing_id_is_not_found_rather_than_empty() {
        let store = MemoryStore::new();
        let id = RecordId::now_v7();
        assert_eq!(store.get(id).await.unwrap(), Lookup::NotFound(id));
    }

    #[tokio::test]
    async fn empty_payload_is_still_found() {
        let store = MemoryStore::new();
        let id = store.create(record(b"")).await.unwrap();
        let lookup = store.get(id).await.unwrap();
        assert!(matches!(lookup, Lookup::Found(r) if r.payload.is_empty()));
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite_an_existing_id() {
        let store = MemoryStore::new();
        let first = record(b"first");
        store.create(first.clone()).await.unwrap();

        let err = store
            .create(Record::new(first.id, Bytes::from_static(b"second")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::IdCollision {
                id: first.id.to_string()
            }
        );
        assert_eq!(store.get(first.id).await.unwrap(), Lookup::Found(first));
    }

    #[tokio::test]
    async fn delete_count_and_delete_all() {
        let store = MemoryStore::new();
        let a = store.create(record(b"a")).await.unwrap();
        store.create(record(b"b")).await.unwrap();
        store.create(record(b"c")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        assert!(store.delete(a).await.unwrap());
        assert!(!store.delete(a).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
