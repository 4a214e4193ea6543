//! End-to-end sessions against an in-process ndt7 server.
//!
//! The server speaks just enough ndt7 for the client: it echoes the
//! subprotocol, floods binary frames and JSON measurements on
//! `/ndt/v7/download`, and sinks frames on `/ndt/v7/upload` while reporting
//! fixed TCPInfo numbers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use ndt7_client::error::ABNORMAL_CLOSURE_MESSAGE;
use ndt7_client::pacing::{INITIAL_MESSAGE_SIZE, MAX_MESSAGE_SIZE};
use ndt7_client::worker::{Outbox, UploadWorker, Worker, WorkerContext};
use ndt7_client::{Callbacks, Client, ClientConfig, Ndt7Error, Results, SubtestKind};
use ndt7_common::protocol::{SUBPROTOCOL, WorkerMessage, WorkerRequest};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// ── Fake server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum DownloadMode {
    /// Frames, two measurements, then a normal close.
    Complete,
    /// Drop the TCP connection right after the handshake.
    Drop,
}

#[derive(Debug, Clone, Copy)]
enum UploadMode {
    /// Sink frames until the client closes.
    UntilClientCloses,
    /// Close with 1000 after this many frames.
    CloseAfter(usize),
}

#[derive(Debug, Clone, Copy)]
struct Modes {
    download: DownloadMode,
    upload: UploadMode,
}

#[derive(Default)]
struct Stats {
    connections: AtomicUsize,
    paths: Mutex<Vec<String>>,
    subprotocol_offered: AtomicBool,
    download_bytes: AtomicU64,
    upload_frames: Mutex<Vec<usize>>,
}

struct FakeServer {
    addr: SocketAddr,
    stats: Arc<Stats>,
    task: JoinHandle<()>,
}

impl FakeServer {
    async fn start(download: DownloadMode) -> Self {
        Self::start_with(Modes {
            download,
            upload: UploadMode::UntilClientCloses,
        })
        .await
    }

    async fn start_with(modes: Modes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());
        let task = tokio::spawn(accept_loop(listener, stats.clone(), modes));
        Self { addr, stats, task }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            url_template: format!("ws://{}/ndt/v7/{{subtest}}", self.addr),
            watchdog: Duration::from_secs(5),
            upload_duration: Duration::from_millis(300),
            measurement_interval: Duration::from_millis(1),
            ..ClientConfig::default()
        }
    }

    fn url(&self, subtest: SubtestKind) -> String {
        format!("ws://{}/ndt/v7/{subtest}", self.addr)
    }

    fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    fn paths(&self) -> Vec<String> {
        self.stats.paths.lock().unwrap().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, stats: Arc<Stats>, modes: Modes) {
    while let Ok((tcp, _)) = listener.accept().await {
        stats.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(tcp, stats.clone(), modes));
    }
}

async fn serve(tcp: TcpStream, stats: Arc<Stats>, modes: Modes) {
    let mut path = String::new();
    let handshake = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        let offered = req
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .is_some_and(|v| v.as_bytes() == SUBPROTOCOL.as_bytes());
        if offered {
            stats.subprotocol_offered.store(true, Ordering::SeqCst);
            resp.headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
        }
        Ok(resp)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, handshake).await else {
        return;
    };
    stats.paths.lock().unwrap().push(path.clone());

    match (path.as_str(), modes.download) {
        ("/ndt/v7/download", DownloadMode::Complete) => serve_download(ws, &stats).await,
        ("/ndt/v7/download", DownloadMode::Drop) => drop(ws),
        ("/ndt/v7/upload", _) => serve_upload(ws, &stats, modes.upload).await,
        _ => {}
    }
}

type ServerWs = tokio_tungstenite::WebSocketStream<TcpStream>;

fn download_measurement(rtt: u64, with_connection_info: bool) -> String {
    let mut m = serde_json::json!({
        "TCPInfo": {"RTT": rtt, "BytesRetrans": 10, "BytesSent": 1000},
        "Origin": "server",
        "Test": "download"
    });
    if with_connection_info {
        m["ConnectionInfo"] = serde_json::json!({
            "Client": "127.0.0.1:50000",
            "Server": "127.0.0.1:4443",
            "UUID": "fake-ndt7"
        });
    }
    m.to_string()
}

fn upload_measurement(rtt: u64) -> String {
    serde_json::json!({
        "TCPInfo": {"RTT": rtt, "BytesReceived": 1_250_000, "ElapsedTime": 1_000_000},
        "Origin": "server",
        "Test": "upload"
    })
    .to_string()
}

async fn serve_download(mut ws: ServerWs, stats: &Stats) {
    let payload = bytes::Bytes::from(vec![0xa5u8; 16 * 1024]);
    for (round, rtt) in [1000u64, 2000].into_iter().enumerate() {
        let text = download_measurement(rtt, round == 0);
        stats
            .download_bytes
            .fetch_add(text.len() as u64, Ordering::SeqCst);
        if ws.send(Message::text(text)).await.is_err() {
            return;
        }
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            stats
                .download_bytes
                .fetch_add(payload.len() as u64, Ordering::SeqCst);
            if ws.send(Message::Binary(payload.clone())).await.is_err() {
                return;
            }
        }
    }
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = ws.close(Some(frame)).await;
    while let Some(Ok(_)) = ws.next().await {}
}

async fn serve_upload(mut ws: ServerWs, stats: &Stats, mode: UploadMode) {
    let mut reported = false;
    let mut closing = false;
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Binary(_)) if closing => {}
            Ok(Message::Binary(data)) => {
                let received = {
                    let mut frames = stats.upload_frames.lock().unwrap();
                    frames.push(data.len());
                    frames.len()
                };
                if matches!(mode, UploadMode::CloseAfter(n) if received >= n) {
                    closing = true;
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if ws.close(Some(frame)).await.is_err() {
                        return;
                    }
                    continue;
                }
                if !reported {
                    reported = true;
                    for rtt in [3000, 1000] {
                        if ws.send(Message::text(upload_measurement(rtt))).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Keep polling so the close reply is flushed.
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn collecting() -> (Callbacks, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<Results>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::new(Mutex::new(Vec::new()));
    let error_sink = errors.clone();
    let results_sink = results.clone();
    let callbacks = Callbacks::new()
        .on_error(move |e| error_sink.lock().unwrap().push(e.to_string()))
        .on_final_measurements(move |r| results_sink.lock().unwrap().push(r.clone()));
    (callbacks, errors, results)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_session_succeeds() {
    let server = FakeServer::start(DownloadMode::Complete).await;
    let (callbacks, errors, results) = collecting();
    let upload_samples = Arc::new(AtomicUsize::new(0));
    let counter = upload_samples.clone();
    let callbacks = callbacks.on_upload_measurement(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let status = Client::new(server.config(), callbacks).run().await.unwrap();

    assert_eq!(status.code(), 0, "errors: {:?}", errors.lock().unwrap());
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(server.paths(), vec!["/ndt/v7/download", "/ndt/v7/upload"]);
    assert!(server.stats.subprotocol_offered.load(Ordering::SeqCst));
    assert!(upload_samples.load(Ordering::SeqCst) > 0);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let r = &results[0];
    // RTTs [1000, 2000] then [3000, 1000] µs.
    assert!(approx(r.rtt, 1.75));
    assert!(approx(r.jitter, 4.0 / 3.0));
    assert!(approx(r.bandwidth_upload, 10.0));
    assert!(approx(r.retransmission_pct, 1.0));
    assert!(r.bandwidth_download > 0.0);
    assert_eq!(r.client_ip, "127.0.0.1");
    assert_eq!(r.server_ip, "127.0.0.1");
    assert_eq!(r.server_name, "127.0.0.1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abnormal_download_skips_upload() {
    let server = FakeServer::start(DownloadMode::Drop).await;
    let (callbacks, errors, results) = collecting();

    let status = Client::new(server.config(), callbacks).run().await.unwrap();

    assert_eq!(status.code(), 1);
    assert_eq!(status.upload(), 0);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![ABNORMAL_CLOSURE_MESSAGE.to_string()]
    );
    assert!(results.lock().unwrap().is_empty());
    // Give a stray upload connection time to show up before checking.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_error_hook_surfaces_error() {
    let server = FakeServer::start(DownloadMode::Drop).await;

    let err = Client::new(server.config(), Callbacks::new())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Ndt7Error::Connection {
            subtest: SubtestKind::Download
        }
    ));
    assert_eq!(err.subtest(), Some(SubtestKind::Download));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_fails_download() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = ClientConfig {
        url_template: format!("ws://{addr}/ndt/v7/{{subtest}}"),
        ..ClientConfig::default()
    };
    let (callbacks, errors, _results) = collecting();

    let status = Client::new(config, callbacks).run().await.unwrap();

    assert_eq!(status.code(), 1);
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn standalone_download_collects_rtts() {
    let server = FakeServer::start(DownloadMode::Complete).await;
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = samples.clone();
    let callbacks = Callbacks::new()
        .on_error(|e| panic!("unexpected error: {e}"))
        .on_download_measurement(move |m| sink.lock().unwrap().push(m.num_bytes));
    let mut client = Client::new(server.config(), callbacks);

    let outcome = client.download().await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.rtts(), &[1000, 2000]);
    let conn = outcome.server.unwrap().connection_info.unwrap();
    assert_eq!(conn.uuid.as_deref(), Some("fake-ndt7"));

    let samples = samples.lock().unwrap();
    assert!(!samples.is_empty());
    assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    let sent = server.stats.download_bytes.load(Ordering::SeqCst);
    assert!(*samples.last().unwrap() <= sent);
    assert_eq!(outcome.client.unwrap().num_bytes, *samples.last().unwrap());
    assert_eq!(server.paths(), vec!["/ndt/v7/download"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn standalone_upload_grows_frames() {
    let server = FakeServer::start(DownloadMode::Complete).await;
    let mut client = Client::new(
        server.config(),
        Callbacks::new().on_error(|e| panic!("unexpected error: {e}")),
    );

    let outcome = client.upload().await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.rtts(), &[3000, 1000]);
    let client_sample = outcome.client.expect("client upload sample");
    assert!(client_sample.num_bytes > 0);

    let frames = server.stats.upload_frames.lock().unwrap().clone();
    assert!(!frames.is_empty());
    assert_eq!(frames[0], INITIAL_MESSAGE_SIZE);
    assert!(frames.windows(2).all(|w| w[0] <= w[1]));
    assert!(frames.iter().all(|&len| len <= MAX_MESSAGE_SIZE));
    assert!(
        frames
            .windows(2)
            .all(|w| w[1] == w[0] || w[1] == 2 * w[0])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_closes_at_deadline() {
    let server = FakeServer::start(DownloadMode::Complete).await;
    let config = server.config();
    let (upload_duration, watchdog) = (config.upload_duration, config.watchdog);
    let mut client = Client::new(
        config,
        Callbacks::new().on_error(|e| panic!("unexpected error: {e}")),
    );

    let started = Instant::now();
    let outcome = client.upload().await.unwrap();
    let elapsed = started.elapsed();

    assert!(outcome.is_success());
    assert!(elapsed >= upload_duration);
    // The client's own close ends the subtest, not the watchdog.
    assert!(
        elapsed < Duration::from_secs(2) && elapsed < watchdog,
        "upload took {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_close_mid_upload_reports_one_close() {
    let server = FakeServer::start_with(Modes {
        download: DownloadMode::Complete,
        upload: UploadMode::CloseAfter(3),
    })
    .await;
    let (request_tx, request_rx) = mpsc::channel(1);
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    let ctx = WorkerContext {
        inbox: request_rx,
        outbox: Outbox::new(message_tx),
    };
    request_tx
        .send(WorkerRequest::Upload(server.url(SubtestKind::Upload)))
        .await
        .unwrap();

    let started = Instant::now();
    let worker = UploadWorker::new(Duration::from_secs(10), Duration::from_millis(1));
    tokio::time::timeout(Duration::from_secs(5), worker.run(ctx))
        .await
        .expect("upload worker kept running after the server closed");
    assert!(started.elapsed() < Duration::from_secs(2));

    // The worker dropped its outbox, so the channel ends.
    let mut closes = Vec::new();
    while let Some(msg) = message_rx.recv().await {
        if let WorkerMessage::Closed { code } = msg {
            closes.push(code);
        }
    }
    assert_eq!(closes, vec![1000]);
    assert!(server.stats.upload_frames.lock().unwrap().len() >= 3);
}
