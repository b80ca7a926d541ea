//! Server lifecycle: bind, serve, drain, force stop.
//!
//! ```text
//! Created -> Listening -> Serving -> Draining -> Stopped
//!                                  \__________/
//!                                  forced stop
//! ```
//!
//! [`RelayServer`] owns the service and publishes its state on a watch
//! channel. [`ServerHandle`] is the cloneable remote control: `stop` starts a
//! graceful drain bounded by the configured shutdown timeout, `panic_stop`
//! abandons in-flight calls immediately.

use crate::server::{
    config::ServerConfig,
    service::handler::{RelayService, build_relay_service},
    store::{IdGenerator, RecordStore, UuidV7Ids},
};
use anyhow::Context;
use blobrelay_core::proto::{FILE_DESCRIPTOR_SET, blob_relay_server::BlobRelayServer};
use core::time::Duration;
use futures::Stream;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::watch,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Server, server::Connected};
use tonic_health::server::HealthReporter;

/// Time a forced stop waits for cancelled calls to report before giving up.
const FORCED_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    Created,
    Listening,
    Serving,
    Draining,
    Stopped,
}

/// Remote control for a [`RelayServer`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    stop: CancellationToken,
    panic: CancellationToken,
    state: watch::Receiver<ServerState>,
}

impl ServerHandle {
    /// Starts a graceful shutdown. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Cancels every in-flight call and stops the server without draining.
    pub fn panic_stop(&self) {
        self.stop.cancel();
        self.panic.cancel();
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Waits until the server has reached `target` or any later state.
    pub async fn wait_for(&self, target: ServerState) -> ServerState {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s >= target).await.map(|s| *s);
        reached.unwrap_or_else(|_| *state.borrow())
    }
}

pub struct RelayServer<S, G = UuidV7Ids> {
    config: ServerConfig,
    service: RelayService<S, G>,
    state: watch::Sender<ServerState>,
    stop: CancellationToken,
    panic: CancellationToken,
}

impl<S: RecordStore> RelayServer<S> {
    pub fn new(config: ServerConfig, store: Arc<S>) -> Self {
        let service = RelayService::new(config.clone(), store);
        Self::with_service(config, service)
    }
}

impl<S: RecordStore, G: IdGenerator> RelayServer<S, G> {
    pub fn with_service(config: ServerConfig, service: RelayService<S, G>) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        Self {
            config,
            service,
            state,
            stop: CancellationToken::new(),
            panic: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: self.stop.clone(),
            panic: self.panic.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn service(&self) -> &RelayService<S, G> {
        &self.service
    }

    /// Binds the configured TCP address.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound; the server stays `Created`.
    pub async fn bind_tcp(&self) -> anyhow::Result<(SocketAddr, TcpListenerStream)> {
        let listener = TcpListener::bind(&self.config.server_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.server_addr))?;
        let addr = listener.local_addr()?;
        self.set_state(ServerState::Listening);
        tracing::info!(%addr, "Listening");
        Ok((addr, TcpListenerStream::new(listener)))
    }

    /// Binds the configured address as a Unix domain socket.
    #[cfg(unix)]
    pub fn bind_uds(&self) -> anyhow::Result<tokio_stream::wrappers::UnixListenerStream> {
        let path = &self.config.server_addr;
        let listener = tokio::net::UnixListener::bind(path)
            .with_context(|| format!("failed to bind unix socket {path}"))?;
        self.set_state(ServerState::Listening);
        tracing::info!(%path, "Listening");
        Ok(tokio_stream::wrappers::UnixListenerStream::new(listener))
    }

    /// Binds according to the configuration and serves until stopped.
    pub async fn run(self) -> anyhow::Result<()> {
        log_startup_info(&self.config);

        if self.config.uds {
            #[cfg(unix)]
            {
                let path = self.config.server_addr.clone();
                let incoming = self.bind_uds()?;
                let res = self.serve(incoming).await;
                // A panic can still leave the socket file behind.
                let _ = std::fs::remove_file(&path);
                res
            }
            #[cfg(not(unix))]
            {
                anyhow::bail!("Unix domain sockets are not supported on this platform");
            }
        } else {
            let (_, incoming) = self.bind_tcp().await?;
            self.serve(incoming).await
        }
    }

    /// Serves `incoming` until [`ServerHandle::stop`] or
    /// [`ServerHandle::panic_stop`], then drains or forces the shutdown.
    pub async fn serve<I, IO, IE>(self, incoming: I) -> anyhow::Result<()>
    where
        I: Stream<Item = Result<IO, IE>>,
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
        IO::ConnectInfo: Clone + Send + Sync + 'static,
        IE: Into<tower::BoxError>,
    {
        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<BlobRelayServer<RelayService<S, G>>>()
            .await;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let drain = CancellationToken::new();
        let drain_signal = {
            let drain = drain.clone();
            async move { drain.cancelled().await }
        };

        let serving = Server::builder()
            .http2_adaptive_window(Some(true))
            .max_concurrent_streams(self.config.max_concurrent_streams)
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_relay_service(self.service.clone()))
            .serve_with_incoming_shutdown(incoming, drain_signal);
        let mut serving = Box::pin(serving);
        self.set_state(ServerState::Serving);

        tokio::select! {
            res = &mut serving => {
                // The listener ended on its own.
                self.set_state(ServerState::Stopped);
                res.context("server terminated")?;
                return Ok(());
            }
            () = self.stop.cancelled() => {}
        }

        set_not_serving::<S, G>(&health_reporter).await;
        self.service.begin_drain();
        self.set_state(ServerState::Draining);

        let forced = if self.panic.is_cancelled() {
            true
        } else {
            tracing::info!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown requested, draining"
            );
            drain.cancel();
            let graceful = async {
                let res = (&mut serving).await;
                self.service.wait_idle().await;
                res
            };

            tokio::select! {
                res = graceful => {
                    if let Err(e) = res {
                        tracing::error!(error = %e, "Server failed while draining");
                    }
                    false
                }
                () = sleep(self.config.shutdown_timeout) => {
                    tracing::warn!("Shutdown deadline elapsed");
                    true
                }
                () = self.panic.cancelled() => true,
            }
        };

        if forced {
            self.service.force_stop();
            drop(serving);
            if timeout(FORCED_SETTLE, self.service.wait_idle())
                .await
                .is_err()
            {
                tracing::warn!(
                    inflight = self.service.inflight_calls(),
                    "Calls still settling after forced stop"
                );
            }
        }

        self.set_state(ServerState::Stopped);
        tracing::info!(forced, "Server stopped");
        Ok(())
    }

    fn set_state(&self, next: ServerState) {
        let prev = self.state.send_replace(next);
        tracing::debug!(?prev, ?next, "Server state changed");
    }
}

async fn set_not_serving<S: RecordStore, G: IdGenerator>(reporter: &HealthReporter) {
    reporter
        .set_not_serving::<BlobRelayServer<RelayService<S, G>>>()
        .await;
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting relay on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting relay on {} (handoff capacity {})",
            config.server_addr,
            config.handoff_capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_along_the_lifecycle() {
        use ServerState::*;
        let order = [Created, Listening, Serving, Draining, Stopped];
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn wait_for_returns_the_current_state_once_the_server_is_gone() {
        let server = RelayServer::new(
            ServerConfig::default(),
            Arc::new(crate::server::store::MemoryStore::new()),
        );
        let handle = server.handle();
        assert_eq!(handle.state(), ServerState::Created);

        drop(server);
        assert_eq!(
            handle.wait_for(ServerState::Stopped).await,
            ServerState::Created
        );
    }
}
