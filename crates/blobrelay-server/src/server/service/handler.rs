//! gRPC service implementation for the payload relay.
//!
//! This module defines [`RelayService`], the concrete implementation of the
//! [`BlobRelay`] gRPC service defined in the protobuf specification. Both
//! endpoints are bidirectional streams:
//!
//! - `Store` accepts base64-encoded payloads and acknowledges each one with a
//!   freshly assigned record id.
//! - `Retrieve` accepts record ids and streams back each stored payload, or a
//!   `not_found` response for ids that were never stored.
//!
//! ## Responsibilities
//!
//! - Admit calls through the [`CallTracker`], refusing them while draining.
//! - Open a [`CallScope`] per call and spawn its two pipeline stages.
//! - Keep the call registered until the scope has settled, so draining waits
//!   for every response to be handed to the transport.

use super::tracker::{CallGuard, CallTracker};
use crate::server::{
    config::ServerConfig,
    store::{IdGenerator, RecordStore, UuidV7Ids},
    streaming::{ingest, retrieve, scope::CallScope},
};
use blobrelay_core::proto::{
    RetrieveRequest, RetrieveResponse, StoreRequest, StoreResponse,
    blob_relay_server::{BlobRelay, BlobRelayServer},
};
use core::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming, codec::CompressionEncoding};
use tracing::Instrument;

/// Relay service over a [`RecordStore`].
///
/// Cloning is cheap: clones share the store, the id generator and the call
/// tracker, so a clone can be kept outside the gRPC router to drive shutdown.
pub struct RelayService<S, G = UuidV7Ids> {
    config: ServerConfig,
    store: Arc<S>,
    ids: Arc<G>,
    tracker: Arc<CallTracker>,
}

impl<S, G> Clone for RelayService<S, G> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            ids: Arc::clone(&self.ids),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

impl<S: RecordStore> RelayService<S> {
    pub fn new(config: ServerConfig, store: Arc<S>) -> Self {
        Self::with_id_generator(config, store, Arc::new(UuidV7Ids))
    }
}

impl<S: RecordStore, G: IdGenerator> RelayService<S, G> {
    pub fn with_id_generator(config: ServerConfig, store: Arc<S>, ids: Arc<G>) -> Self {
        Self {
            config,
            store,
            ids,
            tracker: Arc::new(CallTracker::new()),
        }
    }

    pub fn record_store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn inflight_calls(&self) -> usize {
        self.tracker.inflight()
    }

    /// Refuses new calls with `UNAVAILABLE`; running calls continue.
    pub fn begin_drain(&self) {
        self.tracker.begin_drain();
    }

    /// Cancels every in-flight call. Each one ends with `UNAVAILABLE` if its
    /// client is still listening.
    pub fn force_stop(&self) {
        self.tracker.force_stop();
    }

    /// Resolves once every admitted call has settled.
    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await;
    }

    fn open_scope(&self, method: &'static str) -> Result<(CallGuard, CallScope), Status> {
        let guard = self.tracker.admit(method)?;
        Ok((guard, CallScope::new(method, self.tracker.force_token())))
    }

    /// Drives `scope` to its outcome in the background. The guard is released
    /// only once the outcome has been reported.
    fn settle<T>(
        &self,
        guard: CallGuard,
        scope: CallScope,
        responses: mpsc::Sender<Result<T, Status>>,
    ) where
        T: Send + 'static,
    {
        let span = scope.span().clone();
        tokio::spawn(
            async move {
                scope.finish(responses).await;
                drop(guard);
            }
            .instrument(span),
        );
    }
}

#[tonic::async_trait]
impl<S: RecordStore, G: IdGenerator> BlobRelay for RelayService<S, G> {
    type StoreStream = Pin<Box<dyn Stream<Item = Result<StoreResponse, Status>> + Send>>;
    type RetrieveStream = Pin<Box<dyn Stream<Item = Result<RetrieveResponse, Status>> + Send>>;

    /// Handles a stream of payloads to persist.
    ///
    /// Each frame is decoded, stored under a fresh id, and acknowledged in
    /// request order. A malformed frame or a store failure ends the call with
    /// an error status after the acknowledgements already produced.
    async fn store(
        &self,
        req: Request<Streaming<StoreRequest>>,
    ) -> Result<Response<Self::StoreStream>, Status> {
        let (guard, mut scope) = self.open_scope("Store")?;
        let (resp_tx, resp_rx) = mpsc::channel(self.config.response_buffer_size);

        ingest::spawn(
            &mut scope,
            req.into_inner(),
            Arc::clone(&self.store),
            Arc::clone(&self.ids),
            resp_tx.clone(),
            self.config.handoff_capacity,
        );
        self.settle(guard, scope, resp_tx);

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }

    /// Handles a stream of record ids to fetch.
    ///
    /// Unknown ids produce a `not_found` response and the call continues; an
    /// empty or malformed id ends the call with `INVALID_ARGUMENT`.
    async fn retrieve(
        &self,
        req: Request<Streaming<RetrieveRequest>>,
    ) -> Result<Response<Self::RetrieveStream>, Status> {
        let (guard, mut scope) = self.open_scope("Retrieve")?;
        let (resp_tx, resp_rx) = mpsc::channel(self.config.response_buffer_size);

        retrieve::spawn(
            &mut scope,
            req.into_inner(),
            Arc::clone(&self.store),
            resp_tx.clone(),
            self.config.handoff_capacity,
        );
        self.settle(guard, scope, resp_tx);

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }
}

/// Wraps `service` in the generated server with compression and message size
/// limits applied.
pub fn build_relay_service<S, G>(
    service: RelayService<S, G>,
) -> BlobRelayServer<RelayService<S, G>>
where
    S: RecordStore,
    G: IdGenerator,
{
    let max_message_bytes = service.config.max_message_bytes;
    BlobRelayServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes)
}
