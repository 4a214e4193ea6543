//! Data models for an ndt7 session.
//!
//! A session runs two subtests. Each resolves once to a [`SubtestOutcome`];
//! the pair collapses into a [`TestStatus`] and, when both succeed, a
//! [`Results`] record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{ClientMeasurement, ServerMeasurement};

// ── Subtest Outcome ─────────────────────────────────────────────────

/// Return code of a subtest that completed.
pub const RETURN_OK: u8 = 0;
/// Return code of a subtest that failed.
pub const RETURN_FAILED: u8 = 1;

/// How a subtest ended, with the last samples seen on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtestOutcome {
    pub return_code: u8,
    pub client: Option<ClientMeasurement>,
    pub server: Option<ServerMeasurement>,
}

impl SubtestOutcome {
    pub fn is_success(&self) -> bool {
        self.return_code == RETURN_OK
    }

    /// RTT samples (µs) collected over the subtest; empty unless it succeeded.
    pub fn rtts(&self) -> &[u64] {
        self.server
            .as_ref()
            .map(|s| s.all_rtts.as_slice())
            .unwrap_or(&[])
    }
}

// ── Session Status ──────────────────────────────────────────────────

/// Composite status of a session: `download + (upload << 4)`.
///
/// Each nibble carries one subtest's return code, so both outcomes can be
/// recovered from the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestStatus(u8);

impl TestStatus {
    pub fn new(download: u8, upload: u8) -> Self {
        Self((download & 0x0f) + ((upload & 0x0f) << 4))
    }

    pub fn code(&self) -> u8 {
        self.0
    }

    pub fn download(&self) -> u8 {
        self.0 & 0x0f
    }

    pub fn upload(&self) -> u8 {
        self.0 >> 4
    }

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (download={}, upload={})",
            self.0,
            self.download(),
            self.upload()
        )
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Final metrics of a fully successful session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    /// When the session started.
    pub timestamp: DateTime<Utc>,
    /// Mbps, from the client's last download sample.
    pub bandwidth_download: f64,
    /// From the server's last upload sample.
    pub bandwidth_upload: f64,
    pub retransmission_pct: f64,
    /// Mean RTT over both subtests, ms.
    pub rtt: f64,
    /// Mean absolute RTT variation over both subtests, ms.
    pub jitter: f64,
    #[serde(rename = "clientIP")]
    pub client_ip: String,
    #[serde(rename = "serverIP")]
    pub server_ip: String,
    /// Host name the session connected to.
    pub server_name: String,
}
