//! # Upload pacing
//!
//! Message size sets the client's measurement granularity: small messages
//! are needed to measure slow links accurately, large ones to fill fast
//! links without per-send overhead dominating. The link speed is unknown
//! up front, so the message size grows exponentially with the bytes the
//! socket has actually flushed:
//!
//! ```text
//!   flushed = queued - buffered
//!
//!   flushed >= 16 × size  ──▶  size = min(2 × size, 8 MiB)
//!   buffered < 7 × size   ──▶  queue one more message
//! ```
//!
//! Starting at 8 KiB, the first doubling happens after 16 messages and every
//! 8 messages of the new size after that. A message is queued only while
//! fewer than seven are outstanding, so buffering peaks near 64 MiB.
//!
//! [`PacingState`] is pure: the upload worker feeds it the clock and the
//! socket's outstanding byte count once per scheduler tick.

use std::time::Duration;

use bytes::Bytes;
use ndt7_common::protocol::ClientMeasurement;
use rand::Rng;
use tokio::time::Instant;

/// Initial upload message size (8 KiB).
pub const INITIAL_MESSAGE_SIZE: usize = 1 << 13;
/// Largest upload message size (8 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1 << 23;
/// Flushed bytes, in multiples of the message size, that trigger growth.
pub const GROWTH_THRESHOLD: u64 = 16;
/// Messages kept queued on the socket.
pub const QUEUE_DEPTH: u64 = 7;

/// What the worker should do after a tick.
#[derive(Debug)]
pub enum Tick {
    /// The upload window is over: close the connection and stop.
    Deadline,
    Continue {
        /// Message to queue. Already counted in `total_queued`.
        send: Option<Bytes>,
        /// Client-side sample to report.
        sample: Option<ClientMeasurement>,
    },
}

/// Pacing loop state, owned by the upload worker.
#[derive(Debug)]
pub struct PacingState {
    buffer: Bytes,
    /// Bytes handed to the socket so far, flushed or not.
    total_queued: u64,
    start: Instant,
    last_sample: Instant,
    deadline: Instant,
    interval: Duration,
}

impl PacingState {
    pub fn new(start: Instant, duration: Duration, interval: Duration) -> Self {
        Self {
            buffer: random_payload(INITIAL_MESSAGE_SIZE),
            total_queued: 0,
            start,
            last_sample: start,
            deadline: start + duration,
            interval,
        }
    }

    pub fn message_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn total_queued(&self) -> u64 {
        self.total_queued
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run one iteration. `buffered` is the number of queued bytes the
    /// socket has not flushed yet.
    pub fn tick(&mut self, now: Instant, buffered: u64) -> Tick {
        if now >= self.deadline {
            return Tick::Deadline;
        }

        // Growth looks at flushed bytes only, before deciding on a send.
        let flushed = self.total_queued.saturating_sub(buffered);
        let size = self.message_size();
        if size < MAX_MESSAGE_SIZE && flushed >= GROWTH_THRESHOLD * size as u64 {
            let next = (size * 2).min(MAX_MESSAGE_SIZE);
            tracing::debug!(from = size, to = next, flushed, "growing upload message");
            self.buffer = random_payload(next);
        }

        let size = self.message_size() as u64;
        let mut buffered = buffered;
        let send = if buffered < QUEUE_DEPTH * size {
            self.total_queued += size;
            buffered += size;
            Some(self.buffer.clone())
        } else {
            None
        };

        let sample = if now >= self.last_sample + self.interval {
            self.last_sample = now;
            let num_bytes = self.total_queued.saturating_sub(buffered);
            Some(ClientMeasurement::new(now - self.start, num_bytes))
        } else {
            None
        };

        Tick::Continue { send, sample }
    }
}

/// Random bytes, so the payload does not compress on the path.
fn random_payload(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}
