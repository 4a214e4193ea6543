//! Final metrics from two successful subtests.
//!
//! - **bandwidthDownload**: last client download sample, Mbps
//! - **bandwidthUpload**: server's `BytesReceived × 8 / ElapsedTime`
//!   (ElapsedTime is µs, so the result is already Mbps)
//! - **retransmissionPct**: download `BytesRetrans / BytesSent × 100`
//! - **rtt / jitter**: over download `AllRTTs` followed by upload
//!   `AllRTTs`, converted from µs to ms

use chrono::{DateTime, Utc};
use ndt7_common::models::{Results, SubtestOutcome};
use ndt7_common::protocol::{ClientMeasurement, ServerMeasurement, TcpInfo};

use crate::error::Ndt7Error;
use crate::locate::host_of;

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean absolute difference between consecutive samples; 0 with fewer than
/// two samples.
pub fn jitter(samples: &[f64]) -> f64 {
    let diffs: Vec<f64> = samples.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    mean(&diffs)
}

/// Cumulative download rate of a client sample, Mbps.
pub fn download_bandwidth_mbps(sample: &ClientMeasurement) -> Result<f64, Ndt7Error> {
    if sample.elapsed_time <= 0.0 {
        return Err(Ndt7Error::Aggregation(
            "download sample has zero elapsed time".into(),
        ));
    }
    Ok(sample.num_bytes as f64 * 8.0 / sample.elapsed_time / 1_000_000.0)
}

fn tcp_info<'a>(server: &'a ServerMeasurement, subtest: &str) -> Result<&'a TcpInfo, Ndt7Error> {
    server
        .tcp_info
        .as_ref()
        .ok_or_else(|| Ndt7Error::Aggregation(format!("{subtest} server sample has no TCPInfo")))
}

fn field(value: Option<u64>, name: &str) -> Result<u64, Ndt7Error> {
    value.ok_or_else(|| Ndt7Error::Aggregation(format!("TCPInfo.{name} missing")))
}

/// Combine a successful download and upload into [`Results`].
pub fn aggregate(
    download: &SubtestOutcome,
    upload: &SubtestOutcome,
    server_name: &str,
    timestamp: DateTime<Utc>,
) -> Result<Results, Ndt7Error> {
    let down_client = download
        .client
        .as_ref()
        .ok_or_else(|| Ndt7Error::Aggregation("no client download sample".into()))?;
    let down_server = download
        .server
        .as_ref()
        .ok_or_else(|| Ndt7Error::Aggregation("no server download sample".into()))?;
    let up_server = upload
        .server
        .as_ref()
        .ok_or_else(|| Ndt7Error::Aggregation("no server upload sample".into()))?;

    let bandwidth_download = download_bandwidth_mbps(down_client)?;

    let down_tcp = tcp_info(down_server, "download")?;
    let bytes_sent = field(down_tcp.bytes_sent, "BytesSent")?;
    if bytes_sent == 0 {
        return Err(Ndt7Error::Aggregation("download BytesSent is zero".into()));
    }
    let retransmission_pct =
        field(down_tcp.bytes_retrans, "BytesRetrans")? as f64 / bytes_sent as f64 * 100.0;

    let conn = down_server
        .connection_info
        .as_ref()
        .ok_or_else(|| Ndt7Error::Aggregation("no ConnectionInfo in download".into()))?;

    let up_tcp = tcp_info(up_server, "upload")?;
    let elapsed = field(up_tcp.elapsed_time, "ElapsedTime")?;
    if elapsed == 0 {
        return Err(Ndt7Error::Aggregation("upload ElapsedTime is zero".into()));
    }
    let bandwidth_upload = field(up_tcp.bytes_received, "BytesReceived")? as f64 * 8.0 / elapsed as f64;

    let rtts: Vec<f64> = download
        .rtts()
        .iter()
        .chain(upload.rtts())
        .map(|&us| us as f64)
        .collect();
    if rtts.is_empty() {
        return Err(Ndt7Error::Aggregation("no RTT samples".into()));
    }

    Ok(Results {
        timestamp,
        bandwidth_download,
        bandwidth_upload,
        retransmission_pct,
        rtt: mean(&rtts) / 1000.0,
        jitter: jitter(&rtts) / 1000.0,
        client_ip: host_of(&conn.client).to_string(),
        server_ip: host_of(&conn.server).to_string(),
        server_name: server_name.to_string(),
    })
}
