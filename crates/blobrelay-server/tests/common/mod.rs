//! Shared helpers for integration tests.

#![allow(dead_code)]

use blobrelay_core::{
    codec::encode_payload,
    proto::{RetrieveRequest, StoreRequest, blob_relay_client::BlobRelayClient},
};
use blobrelay_server::{
    MemoryStore, RelayServer, RelayService, ServerConfig, ServerHandle, ServerState,
};
use core::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An in-process server listening on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub service: RelayService<MemoryStore>,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let config = ServerConfig {
            server_addr: "127.0.0.1:0".to_string(),
            ..config
        };
        let server = RelayServer::new(config, Arc::new(MemoryStore::new()));
        let handle = server.handle();
        let service = server.service().clone();

        let (addr, incoming) = server.bind_tcp().await.expect("bind loopback");
        let task = tokio::spawn(server.serve(incoming));
        handle.wait_for(ServerState::Serving).await;

        Self {
            addr,
            handle,
            service,
            task,
        }
    }

    pub async fn client(&self) -> BlobRelayClient<Channel> {
        connect(self.addr).await
    }
}

pub async fn connect(addr: SocketAddr) -> BlobRelayClient<Channel> {
    BlobRelayClient::connect(format!("http://{addr}"))
        .await
        .expect("connect to test server")
}

/// Forwards a single TCP connection to `upstream`. Aborting the returned task
/// closes both sockets, as a client host vanishing would.
pub async fn tcp_relay(upstream: SocketAddr) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay address");
    let task = tokio::spawn(async move {
        let (mut client, _) = listener.accept().await.expect("accept client");
        let mut server = TcpStream::connect(upstream).await.expect("reach server");
        let _ = tokio::io::copy_bidirectional(&mut client, &mut server).await;
    });
    (addr, task)
}

pub fn store_request(payload: &[u8]) -> StoreRequest {
    StoreRequest {
        encoded_payload: encode_payload(payload),
    }
}

pub fn retrieve_request(id: impl Into<String>) -> RetrieveRequest {
    RetrieveRequest { id: id.into() }
}

/// Request stream the test feeds one frame at a time.
pub fn request_channel<T>() -> (mpsc::Sender<T>, ReceiverStream<T>) {
    let (tx, rx) = mpsc::channel(16);
    (tx, ReceiverStream::new(rx))
}

/// Stores `payloads` over one Store call and returns their ids in order.
pub async fn store_all(client: &mut BlobRelayClient<Channel>, payloads: &[&[u8]]) -> Vec<String> {
    let requests: Vec<_> = payloads.iter().map(|p| store_request(p)).collect();
    let mut acks = client
        .store(tokio_stream::iter(requests))
        .await
        .expect("store call")
        .into_inner();

    let mut ids = Vec::new();
    while let Some(ack) = acks.message().await.expect("ack") {
        assert_eq!(ack.status, "ok");
        ids.push(String::from_utf8(ack.id.to_vec()).expect("utf-8 id"));
    }
    ids
}
