//! Retrieve pipeline.
//!
//! ```text
//! client ids -> [receive/dispatch] -> handoff -> [encode/send] -> responses
//! ```
//!
//! The dispatch stage validates each id and looks it up; the send stage
//! encodes hits as base64 and reports misses as `not_found` without ending the
//! call. Responses follow request order.

use super::{forward, hand_off, scope::CallScope};
use crate::server::{store::RecordStore, telemetry::increment_lookups};
use blobrelay_core::{
    Error, Result,
    codec::encode_payload,
    proto::{RetrieveRequest, RetrieveResponse},
    types::{Lookup, RecordId, STATUS_NOT_FOUND, STATUS_OK},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Message carried by every hit.
pub const FETCHED_MESSAGE: &str = "success fetched";

pub fn spawn<S, I>(
    scope: &mut CallScope,
    inbound: I,
    store: Arc<S>,
    responses: mpsc::Sender<Result<RetrieveResponse, Status>>,
    handoff_capacity: usize,
) where
    S: RecordStore,
    I: Stream<Item = Result<RetrieveRequest, Status>> + Send + 'static,
{
    let (handoff_tx, handoff_rx) = mpsc::channel(handoff_capacity);
    scope.spawn(receive_dispatch(inbound, store, handoff_tx, scope.token()));
    scope.spawn(encode_send(handoff_rx, responses, scope.token()));
}

async fn receive_dispatch<S, I>(
    inbound: I,
    store: Arc<S>,
    handoff: mpsc::Sender<Lookup>,
    token: CancellationToken,
) -> Result<()>
where
    S: RecordStore,
    I: Stream<Item = Result<RetrieveRequest, Status>> + Send,
{
    let mut inbound = std::pin::pin!(inbound);

    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::RequestCancelled),
            frame = inbound.next() => frame,
        };

        let Some(frame) = frame else {
            tracing::debug!("Client finished sending ids");
            return Ok(());
        };

        let id: RecordId = frame?.id.parse()?;
        let lookup = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::RequestCancelled),
            lookup = store.get(id) => lookup?,
        };
        hand_off(&handoff, &token, lookup).await?;
    }
}

async fn encode_send(
    mut handoff: mpsc::Receiver<Lookup>,
    responses: mpsc::Sender<Result<RetrieveResponse, Status>>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let lookup = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::RequestCancelled),
            lookup = handoff.recv() => match lookup {
                Some(lookup) => lookup,
                None => return Ok(()),
            },
        };

        increment_lookups(lookup.is_found());
        let response = match lookup {
            Lookup::Found(record) => {
                tracing::debug!(id = %record.id, size = record.payload.len(), "Record fetched");
                RetrieveResponse {
                    status: STATUS_OK.to_string(),
                    message: FETCHED_MESSAGE.to_string(),
                    payload: encode_payload(&record.payload),
                }
            }
            Lookup::NotFound(id) => {
                tracing::debug!(%id, "Record not found");
                RetrieveResponse {
                    status: STATUS_NOT_FOUND.to_string(),
                    message: format!("no record for id {id}"),
                    payload: Bytes::new(),
                }
            }
        };
        forward(&responses, &token, response).await?;
    }
}
