//! Subtest workers.
//!
//! A worker runs in its own tokio task and owns everything it touches: the
//! WebSocket, its counters, and (for upload) the pacing state. It talks to
//! its supervisor only through the channels in [`WorkerContext`]:
//!
//! - inbox: the [`WorkerRequest`] naming the URL to measure against
//! - outbox: measurements, then exactly one `closed` or `error`

pub mod download;
pub mod upload;

use std::future::Future;

use ndt7_common::protocol::{
    CLOSE_NO_STATUS, SUBPROTOCOL, SubtestKind, WorkerMessage, WorkerRequest,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub use download::DownloadWorker;
pub use upload::UploadWorker;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A subtest that can be spawned under a supervisor.
pub trait Worker: Send + 'static {
    fn run(self, ctx: WorkerContext) -> impl Future<Output = ()> + Send;
}

/// The worker's end of the supervisor channels.
pub struct WorkerContext {
    pub inbox: mpsc::Receiver<WorkerRequest>,
    pub outbox: Outbox,
}

impl WorkerContext {
    /// Wait for the start request and check it is meant for `kind`.
    ///
    /// Posts an error and returns `None` on a mismatched request.
    pub async fn start(&mut self, kind: SubtestKind) -> Option<String> {
        let request = self.inbox.recv().await?;
        if request.kind() != kind {
            self.outbox.post(WorkerMessage::error(format!(
                "{kind} worker cannot run the {} subtest",
                request.kind()
            )));
            return None;
        }
        match request {
            WorkerRequest::Download(url) | WorkerRequest::Upload(url) => Some(url),
        }
    }
}

/// Sending half towards the supervisor. Posting never blocks.
#[derive(Debug, Clone)]
pub struct Outbox(mpsc::UnboundedSender<WorkerMessage>);

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self(tx)
    }

    pub fn post(&self, msg: WorkerMessage) {
        if self.0.send(msg).is_err() {
            tracing::trace!("supervisor gone, dropping worker message");
        }
    }
}

/// Open a WebSocket to `url`, offering the ndt7 subprotocol.
pub async fn connect(url: &str) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    let (ws, response) = tokio_tungstenite::connect_async(request).await?;
    tracing::debug!(url, status = %response.status(), "WebSocket connected");
    Ok(ws)
}

/// Close code carried by a close frame, as a browser would report it.
pub fn close_code(frame: Option<&CloseFrame>) -> u16 {
    frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_NO_STATUS)
}
