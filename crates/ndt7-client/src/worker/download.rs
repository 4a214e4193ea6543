//! Download subtest worker.
//!
//! Counts every inbound frame, samples client-side throughput at the
//! measurement interval, and forwards the server's JSON measurements
//! untouched. The close event is the only terminal signal: read errors are
//! logged and reported as an abnormal close.

use std::time::Duration;

use futures::StreamExt;
use ndt7_common::protocol::{CLOSE_ABNORMAL, ClientMeasurement, SubtestKind, WorkerMessage};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use super::{Worker, WorkerContext, close_code, connect};

/// Cumulative byte counter with interval-gated sampling.
#[derive(Debug, Clone)]
pub struct DownloadMeter {
    start: Instant,
    previous: Instant,
    total: u64,
    interval: Duration,
}

impl DownloadMeter {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            previous: start,
            total: 0,
            interval,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Account for a frame of `len` bytes. Returns a sample when at least
    /// one interval passed since the previous one.
    pub fn on_frame(&mut self, len: usize, now: Instant) -> Option<ClientMeasurement> {
        self.total += len as u64;
        if now.duration_since(self.previous) < self.interval {
            return None;
        }
        self.previous = now;
        Some(ClientMeasurement::new(now - self.start, self.total))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadWorker {
    interval: Duration,
}

impl DownloadWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Worker for DownloadWorker {
    async fn run(self, mut ctx: WorkerContext) {
        let Some(url) = ctx.start(SubtestKind::Download).await else {
            return;
        };
        let outbox = ctx.outbox;

        let mut ws = match connect(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "download connection failed");
                outbox.post(WorkerMessage::Closed {
                    code: CLOSE_ABNORMAL,
                });
                return;
            }
        };

        let mut meter = DownloadMeter::new(Instant::now(), self.interval);
        let code = loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if let Some(sample) = meter.on_frame(data.len(), Instant::now()) {
                        outbox.post(WorkerMessage::client(SubtestKind::Download, sample));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(sample) = meter.on_frame(text.len(), Instant::now()) {
                        outbox.post(WorkerMessage::client(SubtestKind::Download, sample));
                    }
                    outbox.post(WorkerMessage::server(text.as_str()));
                }
                Some(Ok(Message::Close(frame))) => break close_code(frame.as_ref()),
                Some(Ok(_)) => {} // Ping/Pong handled by tungstenite
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "download read error");
                    break CLOSE_ABNORMAL;
                }
                None => break CLOSE_ABNORMAL,
            }
        };

        tracing::debug!(code, total_bytes = meter.total(), "download closed");
        outbox.post(WorkerMessage::Closed { code });
    }
}
