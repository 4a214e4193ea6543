//! Upload subtest worker.
//!
//! Three futures share the task and are torn down together:
//!
//! - **pacer**: runs [`PacingState`] once per tick and queues frames for the
//!   writer
//! - **writer**: owns the sink and the frame queue, flushes queued frames
//!   and decrements the outstanding byte counter once a frame is on the
//!   socket
//! - **reader**: forwards server measurements and reports the close code
//!   exactly once
//!
//! The writer owns the receiving end of the queue, so a writer that stops on
//! a socket error also stops the pacer.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use ndt7_common::protocol::{CLOSE_ABNORMAL, SubtestKind, WorkerMessage};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::{Outbox, Worker, WorkerContext, close_code, connect};
use crate::pacing::{PacingState, Tick};

/// Pause between ticks while flow control holds sends back.
const IDLE_TICK: Duration = Duration::from_millis(1);

#[derive(Debug)]
enum Outbound {
    Frame(Bytes),
    Close,
}

#[derive(Debug, Clone)]
pub struct UploadWorker {
    duration: Duration,
    interval: Duration,
}

impl UploadWorker {
    pub fn new(duration: Duration, interval: Duration) -> Self {
        Self { duration, interval }
    }
}

impl Worker for UploadWorker {
    async fn run(self, mut ctx: WorkerContext) {
        let Some(url) = ctx.start(SubtestKind::Upload).await else {
            return;
        };
        let outbox = ctx.outbox;

        let ws = match connect(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "upload connection failed");
                outbox.post(WorkerMessage::Closed {
                    code: CLOSE_ABNORMAL,
                });
                return;
            }
        };
        let (sink, stream) = ws.split();

        let buffered = AtomicU64::new(0);
        let closed = AtomicBool::new(false);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let state = PacingState::new(Instant::now(), self.duration, self.interval);

        tokio::join!(
            write_frames(sink, frame_rx, &buffered),
            read_replies(stream, &outbox, &closed),
            pace(state, frame_tx, &buffered, &closed, &outbox),
        );
    }
}

/// Flush queued frames until the queue ends, a close is sent, or the socket
/// fails. Consumes the queue so the pacer notices when the writer is gone.
async fn write_frames<S>(
    mut sink: S,
    mut frames: mpsc::UnboundedReceiver<Outbound>,
    buffered: &AtomicU64,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(out) = frames.recv().await {
        match out {
            Outbound::Frame(data) => {
                let len = data.len() as u64;
                let result = sink.send(Message::Binary(data)).await;
                buffered.fetch_sub(len, Ordering::AcqRel);
                if let Err(e) = result {
                    tracing::warn!(error = %e, "upload write error");
                    break;
                }
            }
            Outbound::Close => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(error = %e, "upload close failed");
                }
                break;
            }
        }
    }
}

/// Forward server measurements until the connection ends, then post the
/// close code once.
async fn read_replies<S>(mut stream: S, outbox: &Outbox, closed: &AtomicBool)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let code = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                outbox.post(WorkerMessage::server(text.as_str()));
            }
            Some(Ok(Message::Close(frame))) => break close_code(frame.as_ref()),
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "upload read error");
                break CLOSE_ABNORMAL;
            }
            None => break CLOSE_ABNORMAL,
        }
    };
    if !closed.swap(true, Ordering::AcqRel) {
        tracing::debug!(code, "upload closed");
        outbox.post(WorkerMessage::Closed { code });
    }
}

/// Drive `state` until the deadline, a close from the peer, or the writer
/// going away. Dropping `frames` on return lets the writer drain and stop.
async fn pace(
    mut state: PacingState,
    frames: mpsc::UnboundedSender<Outbound>,
    buffered: &AtomicU64,
    closed: &AtomicBool,
    outbox: &Outbox,
) {
    while !closed.load(Ordering::Acquire) {
        let mut queued = false;
        match state.tick(Instant::now(), buffered.load(Ordering::Acquire)) {
            Tick::Deadline => {
                tracing::debug!(
                    total_queued = state.total_queued(),
                    message_size = state.message_size(),
                    "upload deadline reached, closing"
                );
                let _ = frames.send(Outbound::Close);
                return;
            }
            Tick::Continue { send, sample } => {
                if let Some(frame) = send {
                    buffered.fetch_add(frame.len() as u64, Ordering::AcqRel);
                    if frames.send(Outbound::Frame(frame)).is_err() {
                        tracing::debug!("upload writer gone, stopping pacer");
                        return;
                    }
                    queued = true;
                }
                if let Some(sample) = sample {
                    outbox.post(WorkerMessage::client(SubtestKind::Upload, sample));
                }
            }
        }
        if queued {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(IDLE_TICK).await;
        }
    }
}
