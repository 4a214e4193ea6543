//! ndt7 protocol messages.
//!
//! Two layers live here:
//! - **Wire**: the subprotocol identifier, WebSocket close codes, and the
//!   JSON measurement the server sends in text frames.
//! - **Worker IPC**: the request a supervisor sends to a subtest worker and
//!   the messages the worker posts back. The serialized form mirrors the
//!   `{MsgType, Source, ...}` shape used by the reference ndt7 clients.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Subprotocol negotiated in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "net.measurementlab.ndt.v7";

/// Close code reported when the connection dropped or never opened.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported for a close frame without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

// ── Subtest ─────────────────────────────────────────────────────────

/// One directional half of a measurement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtestKind {
    Download,
    Upload,
}

impl SubtestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtestKind::Download => "download",
            SubtestKind::Upload => "upload",
        }
    }
}

impl std::fmt::Display for SubtestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubtestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(SubtestKind::Download),
            "upload" => Ok(SubtestKind::Upload),
            other => Err(format!("unknown subtest: {other}")),
        }
    }
}

// ── Server Measurement (wire) ───────────────────────────────────────

/// Measurement reported by the server in a JSON text frame.
///
/// Every block is optional: servers send `ConnectionInfo` at least once,
/// and `TCPInfo` only where kernel introspection is available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerMeasurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_info: Option<AppInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<ConnectionInfo>,
    #[serde(rename = "BBRInfo", default, skip_serializing_if = "Option::is_none")]
    pub bbr_info: Option<BbrInfo>,
    #[serde(rename = "TCPInfo", default, skip_serializing_if = "Option::is_none")]
    pub tcp_info: Option<TcpInfo>,
    /// "client" or "server".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// "download" or "upload".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    /// RTT samples (µs) collected over the subtest, in receipt order.
    /// Filled in by the client after a successful subtest.
    #[serde(rename = "AllRTTs", default, skip_serializing_if = "Vec::is_empty")]
    pub all_rtts: Vec<u64>,
}

impl ServerMeasurement {
    /// Smoothed RTT of this sample in µs, if the server reported one.
    pub fn rtt(&self) -> Option<u64> {
        self.tcp_info.as_ref().and_then(|t| t.rtt)
    }
}

/// Application-level counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppInfo {
    /// µs since the start of the subtest.
    pub elapsed_time: u64,
    pub num_bytes: u64,
}

/// Endpoints of the measured connection, as seen by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionInfo {
    /// Client endpoint, `host:port`.
    #[serde(default)]
    pub client: String,
    /// Server endpoint, `host:port`.
    #[serde(default)]
    pub server: String,
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BbrInfo {
    /// Bottleneck bandwidth estimate, bytes/s.
    #[serde(rename = "BW", default)]
    pub bw: Option<u64>,
    #[serde(rename = "MinRTT", default)]
    pub min_rtt: Option<u64>,
    #[serde(default)]
    pub pacing_gain: Option<u64>,
    #[serde(default)]
    pub cwnd_gain: Option<u64>,
    #[serde(default)]
    pub elapsed_time: Option<u64>,
}

/// Subset of the kernel's `tcp_info` the server exposes. Times are µs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpInfo {
    #[serde(rename = "RTT", default)]
    pub rtt: Option<u64>,
    #[serde(rename = "RTTVar", default)]
    pub rtt_var: Option<u64>,
    #[serde(rename = "MinRTT", default)]
    pub min_rtt: Option<u64>,
    #[serde(default)]
    pub bytes_acked: Option<u64>,
    #[serde(default)]
    pub bytes_received: Option<u64>,
    #[serde(default)]
    pub bytes_retrans: Option<u64>,
    #[serde(default)]
    pub bytes_sent: Option<u64>,
    #[serde(default)]
    pub busy_time: Option<u64>,
    #[serde(default)]
    pub elapsed_time: Option<u64>,
}

// ── Client Measurement ──────────────────────────────────────────────

/// Throughput sample taken on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientMeasurement {
    /// Seconds since the subtest started.
    pub elapsed_time: f64,
    pub num_bytes: u64,
    /// Cumulative-session rate, never a per-interval rate.
    pub mean_client_mbps: f64,
}

impl ClientMeasurement {
    pub fn new(elapsed: Duration, num_bytes: u64) -> Self {
        let elapsed_time = elapsed.as_secs_f64();
        // bytes * bits/byte * megabits/bit / seconds = Mbps
        let mean_client_mbps = if elapsed_time > 0.0 {
            num_bytes as f64 * 8.0 / 1_000_000.0 / elapsed_time
        } else {
            0.0
        };
        Self {
            elapsed_time,
            num_bytes,
            mean_client_mbps,
        }
    }
}

// ── Worker IPC ──────────────────────────────────────────────────────

/// First (and only) message a supervisor sends to its worker:
/// `{"download": url}` or `{"upload": url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRequest {
    Download(String),
    Upload(String),
}

impl WorkerRequest {
    pub fn new(kind: SubtestKind, url: impl Into<String>) -> Self {
        match kind {
            SubtestKind::Download => WorkerRequest::Download(url.into()),
            SubtestKind::Upload => WorkerRequest::Upload(url.into()),
        }
    }

    pub fn kind(&self) -> SubtestKind {
        match self {
            WorkerRequest::Download(_) => SubtestKind::Download,
            WorkerRequest::Upload(_) => SubtestKind::Upload,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            WorkerRequest::Download(url) | WorkerRequest::Upload(url) => url,
        }
    }
}

/// Messages a subtest worker posts to its supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "MsgType", rename_all = "lowercase")]
pub enum WorkerMessage {
    Measurement(Measurement),
    Closed {
        code: u16,
    },
    Error {
        #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A measurement, tagged with where it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Source", rename_all = "lowercase")]
pub enum Measurement {
    Client {
        #[serde(rename = "ClientData")]
        data: ClientMeasurement,
        #[serde(rename = "Test")]
        test: SubtestKind,
    },
    /// Raw JSON text as received; decoded by the supervisor, off the
    /// worker's I/O path.
    Server {
        #[serde(rename = "ServerData")]
        raw: String,
    },
}

impl WorkerMessage {
    pub fn client(test: SubtestKind, data: ClientMeasurement) -> Self {
        WorkerMessage::Measurement(Measurement::Client { data, test })
    }

    pub fn server(raw: impl Into<String>) -> Self {
        WorkerMessage::Measurement(Measurement::Server { raw: raw.into() })
    }

    pub fn error(message: impl Into<String>) -> Self {
        WorkerMessage::Error {
            error: Some(message.into()),
        }
    }

    /// `true` for messages that end the subtest.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Measurement(_))
    }
}
