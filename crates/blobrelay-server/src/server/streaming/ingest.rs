//! Ingest pipeline for the `Store` call.
//!
//! ```text
//! client frames -> [receive/decode] -> handoff -> [persist/acknowledge] -> acks
//! ```
//!
//! The decode stage turns each base64 frame into raw bytes; the persist stage
//! assigns a fresh id, creates the record and acknowledges it. A single
//! consumer drains the handoff in FIFO order and acknowledges each record
//! before taking the next, so acks leave in request order.

use super::{forward, hand_off, scope::CallScope};
use crate::server::{
    store::{IdGenerator, RecordStore},
    telemetry::increment_records_stored,
};
use blobrelay_core::{
    Error, Result,
    codec::decode_payload,
    proto::{StoreRequest, StoreResponse},
    types::{Record, STATUS_OK},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Message carried by every successful acknowledgement.
pub const STORED_MESSAGE: &str = "stored";

/// Spawns both ingest stages into `scope`.
///
/// - `inbound`: the client's request frames.
/// - `responses`: sender side of the gRPC response stream.
/// - `handoff_capacity`: bound on decoded payloads waiting for the store.
pub fn spawn<S, G, I>(
    scope: &mut CallScope,
    inbound: I,
    store: Arc<S>,
    ids: Arc<G>,
    responses: mpsc::Sender<Result<StoreResponse, Status>>,
    handoff_capacity: usize,
) where
    S: RecordStore,
    G: IdGenerator,
    I: Stream<Item = Result<StoreRequest, Status>> + Send + 'static,
{
    let (handoff_tx, handoff_rx) = mpsc::channel(handoff_capacity);
    scope.spawn(receive_decode(inbound, handoff_tx, scope.token()));
    scope.spawn(persist_acknowledge(
        handoff_rx,
        store,
        ids,
        responses,
        scope.token(),
    ));
}

/// Reads frames until end of input, decoding each payload into the handoff.
///
/// Returning drops the handoff sender, which lets the persist stage drain what
/// is left and finish.
async fn receive_decode<I>(
    inbound: I,
    handoff: mpsc::Sender<Bytes>,
    token: CancellationToken,
) -> Result<()>
where
    I: Stream<Item = Result<StoreRequest, Status>> + Send,
{
    let mut inbound = std::pin::pin!(inbound);

    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::RequestCancelled),
            frame = inbound.next() => frame,
        };

        let Some(frame) = frame else {
            tracing::debug!("Client finished sending payloads");
            return Ok(());
        };

        let request = frame?;
        let payload = decode_payload(&request.encoded_payload)?;
        hand_off(&handoff, &token, payload).await?;
    }
}

/// Persists each decoded payload under a fresh id and acknowledges it.
async fn persist_acknowledge<S, G>(
    mut handoff: mpsc::Receiver<Bytes>,
    store: Arc<S>,
    ids: Arc<G>,
    responses: mpsc::Sender<Result<StoreResponse, Status>>,
    token: CancellationToken,
) -> Result<()>
where
    S: RecordStore,
    G: IdGenerator,
{
    loop {
        let payload = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::RequestCancelled),
            payload = handoff.recv() => match payload {
                Some(payload) => payload,
                None => return Ok(()),
            },
        };

        let record = Record::new(ids.next_id(), payload);
        let size = record.payload.len();
        let id = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::RequestCancelled),
            created = store.create(record) => created?,
        };

        increment_records_stored();
        tracing::debug!(%id, size, "Record stored");

        let ack = StoreResponse {
            status: STATUS_OK.to_string(),
            message: STORED_MESSAGE.to_string(),
            id: id.to_bytes(),
        };
        forward(&responses, &token, ack).await?;
    }
}
