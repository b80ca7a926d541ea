//! End-to-end tests against a real server on a loopback port.

mod common;

use blobrelay_core::codec::decode_payload;
use blobrelay_server::{RecordStore, ServerState};
use common::{
    TEST_TIMEOUT, TestServer, connect, request_channel, retrieve_request, store_all,
    store_request, tcp_relay,
};
use futures::{StreamExt, stream::FuturesUnordered};
use std::collections::HashSet;
use tokio::time::timeout;
use tonic::{Code, Status};

/// Runs a Retrieve call that is expected to fail before producing any frame.
async fn retrieve_failure(server: &TestServer, id: &str) -> Status {
    let mut client = server.client().await;
    let call = client
        .retrieve(tokio_stream::iter([retrieve_request(id)]))
        .await;
    match call {
        Err(status) => status,
        Ok(response) => {
            let mut frames = response.into_inner();
            match frames.message().await {
                Err(status) => status,
                Ok(frame) => panic!("expected a failure, got {frame:?}"),
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn hello_round_trips() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let ids = store_all(&mut client, &[b"HELLO"]).await;
    assert_eq!(ids.len(), 1);
    assert!(!ids[0].is_empty());

    let mut responses = client
        .retrieve(tokio_stream::iter([retrieve_request(ids[0].clone())]))
        .await
        .unwrap()
        .into_inner();
    let response = responses.message().await.unwrap().unwrap();
    assert_eq!(response.status, "ok");
    assert_eq!(response.message, "success fetched");
    assert_eq!(decode_payload(&response.payload).unwrap().as_ref(), b"HELLO");
    assert!(responses.message().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_store_calls_get_distinct_ids() {
    let server = TestServer::start().await;
    let mut calls = FuturesUnordered::new();
    for call in 0..16u8 {
        let mut client = server.client().await;
        calls.push(tokio::spawn(async move {
            let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![call, i]).collect();
            let payloads: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
            store_all(&mut client, &payloads).await
        }));
    }

    let mut ids = HashSet::new();
    while let Some(batch) = calls.next().await {
        for id in batch.unwrap() {
            assert!(ids.insert(id), "duplicate id handed out");
        }
    }
    assert_eq!(ids.len(), 160);
}

#[tokio::test(flavor = "multi_thread")]
async fn acks_follow_request_order() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let payloads: Vec<Vec<u8>> = (0..25).map(|i| format!("payload-{i}").into_bytes()).collect();
    let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
    let ids = store_all(&mut client, &refs).await;
    assert_eq!(ids.len(), payloads.len());

    let requests: Vec<_> = ids.iter().cloned().map(retrieve_request).collect();
    let mut responses = client
        .retrieve(tokio_stream::iter(requests))
        .await
        .unwrap()
        .into_inner();

    for expected in &payloads {
        let response = responses.message().await.unwrap().unwrap();
        assert_eq!(response.status, "ok");
        assert_eq!(decode_payload(&response.payload).unwrap().as_ref(), expected);
    }
    assert!(responses.message().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_id_is_not_found_and_the_call_continues() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    let ids = store_all(&mut client, &[b"known"]).await;

    let unknown = "0190b0a4-7a7e-7cc0-8000-000000000000";
    let mut responses = client
        .retrieve(tokio_stream::iter([
            retrieve_request(unknown),
            retrieve_request(ids[0].clone()),
        ]))
        .await
        .unwrap()
        .into_inner();

    let miss = responses.message().await.unwrap().unwrap();
    assert_eq!(miss.status, "not_found");
    assert!(miss.message.contains(unknown));
    assert!(miss.payload.is_empty());

    let hit = responses.message().await.unwrap().unwrap();
    assert_eq!(hit.status, "ok");
    assert_eq!(decode_payload(&hit.payload).unwrap().as_ref(), b"known");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_id_fails_without_a_frame() {
    let server = TestServer::start().await;
    let status = retrieve_failure(&server, "").await;
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_id_is_invalid_argument() {
    let server = TestServer::start().await;
    let status = retrieve_failure(&server, "definitely-not-an-id").await;
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_base64_fails_after_earlier_acks() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    let (frames, requests) = request_channel();

    let mut acks = client.store(requests).await.unwrap().into_inner();
    frames.send(store_request(b"fine")).await.unwrap();
    let first = acks.message().await.unwrap().unwrap();
    assert_eq!(first.status, "ok");

    frames
        .send(blobrelay_core::proto::StoreRequest {
            encoded_payload: bytes::Bytes::from_static(b"!!not base64!!"),
        })
        .await
        .unwrap();
    let status = acks.message().await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    assert_eq!(server.service.record_store().count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_call_leaves_nothing_in_flight() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    let (frames, requests) = request_channel();

    let mut acks = client.store(requests).await.unwrap().into_inner();
    frames.send(store_request(b"one")).await.unwrap();
    acks.message().await.unwrap().unwrap();
    assert_eq!(server.service.inflight_calls(), 1);

    drop(acks);
    drop(frames);

    timeout(TEST_TIMEOUT, server.service.wait_idle())
        .await
        .expect("cancelled call must settle");
    assert_eq!(server.service.inflight_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn severed_connection_settles_the_call() {
    let server = TestServer::start().await;
    let (relay_addr, relay) = tcp_relay(server.addr).await;
    let mut client = connect(relay_addr).await;
    let (frames, requests) = request_channel();

    let mut acks = client.store(requests).await.unwrap().into_inner();
    frames.send(store_request(b"one")).await.unwrap();
    acks.message().await.unwrap().unwrap();
    assert_eq!(server.service.inflight_calls(), 1);

    relay.abort();
    timeout(TEST_TIMEOUT, server.service.wait_idle())
        .await
        .expect("call on a dead connection must settle");
    assert_eq!(server.service.inflight_calls(), 0);
    assert_eq!(server.service.record_store().count().await.unwrap(), 1);

    // The server keeps serving other clients.
    let mut client = server.client().await;
    assert_eq!(store_all(&mut client, &[b"two"]).await.len(), 1);
    drop(frames);
}

#[tokio::test(flavor = "multi_thread")]
async fn draining_rejects_new_calls_with_unavailable() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    server.service.begin_drain();
    let status = match client.store(tokio_stream::iter([store_request(b"late")])).await {
        Err(status) => status,
        Ok(response) => response.into_inner().message().await.unwrap_err(),
    };
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(server.service.record_store().count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_stop_of_an_idle_server_reaches_stopped() {
    let server = TestServer::start().await;
    server.handle.stop();

    let state = timeout(TEST_TIMEOUT, server.handle.wait_for(ServerState::Stopped))
        .await
        .unwrap();
    assert_eq!(state, ServerState::Stopped);
    server.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_deadline_forces_a_hanging_call_to_stop() {
    let server = TestServer::start_with(blobrelay_server::ServerConfig {
        shutdown_timeout: core::time::Duration::from_millis(200),
        ..Default::default()
    })
    .await;
    let mut client = server.client().await;
    let (frames, requests) = request_channel();

    // Never closes its request stream.
    let mut acks = client.store(requests).await.unwrap().into_inner();
    frames.send(store_request(b"pending")).await.unwrap();
    acks.message().await.unwrap().unwrap();

    server.handle.stop();
    let state = timeout(TEST_TIMEOUT, server.handle.wait_for(ServerState::Stopped))
        .await
        .unwrap();
    assert_eq!(state, ServerState::Stopped);
    server.task.await.unwrap().unwrap();
    assert_eq!(server.service.inflight_calls(), 0);

    let last = timeout(TEST_TIMEOUT, acks.message())
        .await
        .expect("client call must end");
    assert!(!matches!(last, Ok(Some(_))));
    drop(frames);
}

#[tokio::test(flavor = "multi_thread")]
async fn panic_stop_abandons_in_flight_calls() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    let (frames, requests) = request_channel();

    let mut acks = client.store(requests).await.unwrap().into_inner();
    frames.send(store_request(b"pending")).await.unwrap();
    acks.message().await.unwrap().unwrap();

    server.handle.panic_stop();
    let state = timeout(TEST_TIMEOUT, server.handle.wait_for(ServerState::Stopped))
        .await
        .unwrap();
    assert_eq!(state, ServerState::Stopped);
    server.task.await.unwrap().unwrap();
    assert_eq!(server.service.inflight_calls(), 0);
    drop(frames);
}
