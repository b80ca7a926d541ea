//! Load client for a running `blobrelay-server`.
//!
//! Generates random uppercase payloads, stores them over `--threads`
//! concurrent Store calls, then fetches every id back over concurrent Retrieve
//! calls and checks that each payload survived the round trip.

use anyhow::{Context, bail};
use blobrelay_core::{
    codec::{decode_payload, encode_payload},
    proto::{RetrieveRequest, StoreRequest, blob_relay_client::BlobRelayClient},
    types::STATUS_OK,
};
use bytes::Bytes;
use clap::Parser;
use futures::stream::{self, FuturesUnordered, StreamExt};
use rand::Rng;
use std::time::{Duration, Instant};
use tonic::{codec::CompressionEncoding, transport::Channel};

#[derive(Parser, Debug)]
#[command(
    name = "blobrelay-client",
    version,
    about = "Stores random payloads and verifies they can be retrieved"
)]
struct ClientArgs {
    /// Server URI.
    #[arg(long, env = "BLOBRELAY_SERVER", default_value_t = String::from("http://localhost:50052"))]
    server: String,

    /// Number of concurrent Store (and later Retrieve) calls. Defaults to the
    /// available parallelism.
    #[arg(long)]
    threads: Option<usize>,

    /// Payloads sent per Store call.
    #[arg(long, default_value_t = 100)]
    payloads: usize,

    /// Minimum payload length in bytes.
    #[arg(long, default_value_t = 1000)]
    min_len: usize,

    /// Maximum payload length in bytes.
    #[arg(long, default_value_t = 10_000)]
    max_len: usize,

    /// Compress requests and responses with zstd.
    #[arg(long, default_value_t = false)]
    zstd: bool,
}

#[derive(Debug, Default)]
struct Summary {
    stored: usize,
    verified: usize,
    mismatched: usize,
    bytes: usize,
    store_time: Duration,
    retrieve_time: Duration,
}

impl Summary {
    fn report(&self) {
        let rate = |count: usize, elapsed: Duration| count as f64 / elapsed.as_secs_f64();
        tracing::info!(
            stored = self.stored,
            verified = self.verified,
            mismatched = self.mismatched,
            bytes = self.bytes,
            store_secs = self.store_time.as_secs_f64(),
            retrieve_secs = self.retrieve_time.as_secs_f64(),
            "Store {:.2} payloads/sec, Retrieve {:.2} payloads/sec",
            rate(self.stored, self.store_time),
            rate(self.verified + self.mismatched, self.retrieve_time),
        );
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = ClientArgs::parse();
    if args.min_len > args.max_len {
        bail!("--min-len must not exceed --max-len");
    }
    let threads = match args.threads {
        Some(0) => bail!("--threads must be greater than 0"),
        Some(n) => n,
        None => std::thread::available_parallelism().map_or(1, |n| n.get()),
    };

    let channel = Channel::from_shared(args.server.clone())
        .context("invalid server URI")?
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    tracing::info!(server = %args.server, threads, payloads = args.payloads, "Connected");

    let batches: Vec<Vec<Bytes>> = (0..threads)
        .map(|_| random_payloads(args.payloads, args.min_len, args.max_len))
        .collect();

    let mut summary = Summary::default();

    let start = Instant::now();
    let mut calls: FuturesUnordered<_> = batches
        .into_iter()
        .map(|batch| {
            let client = client(channel.clone(), args.zstd);
            tokio::spawn(store_batch(client, batch))
        })
        .collect();
    let mut stored = Vec::with_capacity(threads);
    while let Some(res) = calls.next().await {
        let batch = res.context("store task panicked")??;
        summary.stored += batch.len();
        summary.bytes += batch.iter().map(|(_, p)| p.len()).sum::<usize>();
        stored.push(batch);
    }
    summary.store_time = start.elapsed();

    let start = Instant::now();
    let mut calls: FuturesUnordered<_> = stored
        .into_iter()
        .map(|batch| {
            let client = client(channel.clone(), args.zstd);
            tokio::spawn(verify_batch(client, batch))
        })
        .collect();
    while let Some(res) = calls.next().await {
        let (verified, mismatched) = res.context("retrieve task panicked")??;
        summary.verified += verified;
        summary.mismatched += mismatched;
    }
    summary.retrieve_time = start.elapsed();

    summary.report();
    if summary.mismatched > 0 {
        bail!("{} payloads did not round-trip", summary.mismatched);
    }
    Ok(())
}

fn client(channel: Channel, zstd: bool) -> BlobRelayClient<Channel> {
    let client = BlobRelayClient::new(channel);
    if zstd {
        client
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd)
    } else {
        client
    }
}

fn random_payloads(count: usize, min_len: usize, max_len: usize) -> Vec<Bytes> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let len = rng.random_range(min_len..=max_len);
            let payload: Vec<u8> = (0..len).map(|_| rng.random_range(b'A'..=b'Z')).collect();
            Bytes::from(payload)
        })
        .collect()
}

/// Stores `batch` over one call and pairs each payload with its id.
async fn store_batch(
    mut client: BlobRelayClient<Channel>,
    batch: Vec<Bytes>,
) -> anyhow::Result<Vec<(String, Bytes)>> {
    let requests: Vec<StoreRequest> = batch
        .iter()
        .map(|payload| StoreRequest {
            encoded_payload: encode_payload(payload),
        })
        .collect();

    let mut acks = client.store(stream::iter(requests)).await?.into_inner();
    let mut stored = Vec::with_capacity(batch.len());
    let mut payloads = batch.into_iter();

    while let Some(ack) = acks.message().await? {
        if ack.status != STATUS_OK {
            bail!("store rejected payload: {} {}", ack.status, ack.message);
        }
        let id = String::from_utf8(ack.id.to_vec()).context("record id is not UTF-8")?;
        let payload = payloads.next().context("more acks than payloads")?;
        tracing::debug!(%id, "Stored payload");
        stored.push((id, payload));
    }

    if payloads.next().is_some() {
        bail!("call ended before every payload was acknowledged");
    }
    Ok(stored)
}

/// Retrieves every id in `batch` over one call. Returns (verified, mismatched).
async fn verify_batch(
    mut client: BlobRelayClient<Channel>,
    batch: Vec<(String, Bytes)>,
) -> anyhow::Result<(usize, usize)> {
    let requests: Vec<RetrieveRequest> = batch
        .iter()
        .map(|(id, _)| RetrieveRequest { id: id.clone() })
        .collect();

    let mut responses = client.retrieve(stream::iter(requests)).await?.into_inner();
    let (mut verified, mut mismatched) = (0, 0);
    let mut expected = batch.into_iter();

    while let Some(response) = responses.message().await? {
        let (id, payload) = expected.next().context("more responses than ids")?;
        let matches = response.status == STATUS_OK
            && decode_payload(&response.payload).is_ok_and(|p| p == payload);
        if matches {
            verified += 1;
        } else {
            tracing::error!(
                %id,
                status = %response.status,
                message = %response.message,
                "Payload mismatch"
            );
            mismatched += 1;
        }
    }

    mismatched += expected.count();
    Ok((verified, mismatched))
}
