//! Per-call streaming pipelines.
//!
//! Every Store or Retrieve call runs as two stage tasks joined by a bounded
//! handoff channel, owned by a [`CallScope`](scope::CallScope) that decides
//! the call's outcome:
//!
//! - [`ingest`] - *Receive/Decode* feeding *Persist/Acknowledge*.
//! - [`retrieve`] - *Receive/Dispatch* feeding *Lookup/Encode/Send*.
//! - [`scope`] - the task group and first-error-wins outcome.
//!
//! Stages observe the call's cancellation token at every suspension point and
//! exit with [`Error::RequestCancelled`] once it fires.

pub mod ingest;
pub mod retrieve;
pub mod scope;

use blobrelay_core::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Sends one response frame to the client.
///
/// A closed response channel means the transport dropped the response stream,
/// which only happens when the call is being torn down, so it is reported as a
/// cancellation.
pub(crate) async fn forward<T>(
    responses: &mpsc::Sender<Result<T, Status>>,
    token: &CancellationToken,
    frame: T,
) -> Result<()> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::RequestCancelled),
        sent = responses.send(Ok(frame)) => sent.map_err(|_| Error::RequestCancelled),
    }
}

/// Hands `item` to the sibling stage.
///
/// The handoff only closes early when the sibling exited first. Its exit is
/// already the call's outcome, so this stage just waits for the scope to
/// cancel it instead of racing a second error into the outcome.
pub(crate) async fn hand_off<T>(
    handoff: &mpsc::Sender<T>,
    token: &CancellationToken,
    item: T,
) -> Result<()> {
    let sent = tokio::select! {
        biased;
        () = token.cancelled() => return Err(Error::RequestCancelled),
        sent = handoff.send(item) => sent,
    };
    if sent.is_err() {
        token.cancelled().await;
        return Err(Error::RequestCancelled);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::server::store::RecordStore;
    use blobrelay_core::{
        Error, Result,
        types::{Lookup, Record, RecordId},
    };
    use portable_atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tonic::Status;

    /// Store whose first `healthy` creates succeed; everything after fails.
    #[derive(Debug)]
    pub struct FailingStore {
        healthy: usize,
        created: AtomicUsize,
    }

    impl FailingStore {
        pub const REASON: &'static str = "disk unavailable";

        pub fn after(healthy: usize) -> Self {
            Self {
                healthy,
                created: AtomicUsize::new(0),
            }
        }

        fn failure() -> Error {
            Error::Store {
                context: Self::REASON.to_string(),
            }
        }
    }

    impl RecordStore for FailingStore {
        async fn create(&self, record: Record) -> Result<RecordId> {
            if self.created.fetch_add(1, Ordering::AcqRel) < self.healthy {
                Ok(record.id)
            } else {
                Err(Self::failure())
            }
        }

        async fn get(&self, _id: RecordId) -> Result<Lookup> {
            Err(Self::failure())
        }

        async fn delete(&self, _id: RecordId) -> Result<bool> {
            Err(Self::failure())
        }

        async fn delete_all(&self) -> Result<usize> {
            Err(Self::failure())
        }

        async fn count(&self) -> Result<usize> {
            Err(Self::failure())
        }
    }

    /// Client side of an in-memory request stream.
    pub type Inbound<T> = mpsc::Sender<Result<T, Status>>;

    pub fn inbound<T>() -> (Inbound<T>, ReceiverStream<Result<T, Status>>) {
        let (tx, rx) = mpsc::channel(16);
        (tx, ReceiverStream::new(rx))
    }
}
