//! Load generator that drives an echo server, directly or through a proxy,
//! and measures request latency and throughput.

use anyhow::{bail, ensure, Context};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub address: String,
    pub clients: usize,
    pub requests: usize,
    pub payload_size: usize,
    pub timeout: Duration,
    /// Reuse one connection per client; otherwise reconnect for every request.
    pub keepalive: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:19999".to_string(),
            clients: 20,
            requests: 10_000,
            payload_size: 500 * 1024,
            timeout: Duration::from_secs(60),
            keepalive: true,
        }
    }
}

/// Outcome of a finished run. Latencies are kept sorted.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub clients: usize,
    pub payload_size: usize,
    pub keepalive: bool,
    pub duration: Duration,
    latencies: Vec<Duration>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Summary {
    pub requests: usize,
    pub clients: usize,
    pub payload_size: usize,
    pub keepalive: bool,
    pub duration_secs: f64,
    pub requests_per_second: f64,
    pub megabytes_per_second: f64,
    pub p50_us: Option<u128>,
    pub p90_us: Option<u128>,
    pub p99_us: Option<u128>,
    pub max_us: Option<u128>,
}

impl BenchReport {
    pub fn new(
        clients: usize,
        payload_size: usize,
        keepalive: bool,
        duration: Duration,
        mut latencies: Vec<Duration>,
    ) -> Self {
        latencies.sort_unstable();
        Self {
            clients,
            payload_size,
            keepalive,
            duration,
            latencies,
        }
    }

    pub fn requests(&self) -> usize {
        self.latencies.len()
    }

    pub fn latencies(&self) -> &[Duration] {
        &self.latencies
    }

    pub fn requests_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.requests() as f64 / secs
    }

    pub fn megabytes_per_second(&self) -> f64 {
        self.requests_per_second() * self.payload_size as f64 / MB
    }

    /// Nearest-rank percentile, `p` in `0.0..=100.0`.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * self.latencies.len() as f64).ceil() as usize;
        let idx = rank.saturating_sub(1).min(self.latencies.len() - 1);
        Some(self.latencies[idx])
    }

    pub fn summary(&self) -> Summary {
        let us = |d: Option<Duration>| d.map(|d| d.as_micros());
        Summary {
            requests: self.requests(),
            clients: self.clients,
            payload_size: self.payload_size,
            keepalive: self.keepalive,
            duration_secs: self.duration.as_secs_f64(),
            requests_per_second: self.requests_per_second(),
            megabytes_per_second: self.megabytes_per_second(),
            p50_us: us(self.percentile(50.0)),
            p90_us: us(self.percentile(90.0)),
            p99_us: us(self.percentile(99.0)),
            max_us: us(self.latencies.last().copied()),
        }
    }
}

/// Run the benchmark to completion. Any failed or corrupted echo aborts the
/// whole run.
pub async fn run(config: &BenchConfig) -> anyhow::Result<BenchReport> {
    ensure!(config.clients > 0, "at least one client is required");
    ensure!(config.payload_size > 0, "payload size must be positive");

    let completed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let progress = tokio::spawn({
        let completed = completed.clone();
        let payload_size = config.payload_size as f64;
        async move {
            let mut ticker = interval(Duration::from_millis(250));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let done = completed.load(Ordering::Relaxed);
                let rps = done as f64 / started.elapsed().as_secs_f64();
                let mbps = rps * payload_size / MB;
                tracing::info!("{done} requests finished, {rps:.2} rps, {mbps:.2} MB/s");
            }
        }
    });

    let mut clients = JoinSet::new();
    for id in 0..config.clients {
        let share = config.requests / config.clients + usize::from(id < config.requests % config.clients);
        if share == 0 {
            continue;
        }
        let config = config.clone();
        let completed = completed.clone();
        clients.spawn(async move { client(id, share, &config, &completed).await });
    }

    let mut latencies = Vec::with_capacity(config.requests);
    let mut failure = None;
    while let Some(joined) = clients.join_next().await {
        match joined.context("benchmark client panicked").and_then(|r| r) {
            Ok(mut l) => latencies.append(&mut l),
            Err(e) => {
                failure.get_or_insert(e);
                clients.abort_all();
            }
        }
    }
    progress.abort();

    if let Some(e) = failure {
        return Err(e);
    }
    Ok(BenchReport::new(
        config.clients,
        config.payload_size,
        config.keepalive,
        started.elapsed(),
        latencies,
    ))
}

async fn client(
    id: usize,
    requests: usize,
    config: &BenchConfig,
    completed: &AtomicUsize,
) -> anyhow::Result<Vec<Duration>> {
    let payload = payload(id, config.payload_size);
    let mut echoed = vec![0u8; config.payload_size];
    let mut latencies = Vec::with_capacity(requests);
    let mut kept = None;

    for n in 0..requests {
        let start = Instant::now();
        let mut stream = match kept.take() {
            Some(stream) => stream,
            None => connect(id, config).await?,
        };
        let (mut rd, mut wr) = stream.split();
        let exchange = async {
            tokio::try_join!(wr.write_all(&payload), rd.read_exact(&mut echoed))
        };
        match timeout(config.timeout, exchange).await {
            Err(_) => bail!("client {id}: request {n} timed out"),
            Ok(r) => {
                r.with_context(|| format!("client {id}: request {n} failed"))?;
            }
        }
        latencies.push(start.elapsed());

        ensure!(echoed == payload, "client {id}: request {n} echoed corrupted data");
        completed.fetch_add(1, Ordering::Relaxed);

        if config.keepalive {
            kept = Some(stream);
        }
    }

    Ok(latencies)
}

async fn connect(id: usize, config: &BenchConfig) -> anyhow::Result<TcpStream> {
    let stream = timeout(config.timeout, TcpStream::connect(&config.address))
        .await
        .with_context(|| format!("client {id}: connect to {} timed out", config.address))?
        .with_context(|| format!("client {id}: failed to connect to {}", config.address))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn payload(id: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_add(id) % 251) as u8).collect()
}
