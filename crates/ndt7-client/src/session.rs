//! Session orchestration: download, then upload, then aggregation.

use chrono::Utc;
use ndt7_common::models::{RETURN_OK, SubtestOutcome, TestStatus};
use ndt7_common::protocol::{SubtestKind, WorkerRequest};

use crate::aggregate::aggregate;
use crate::callbacks::Callbacks;
use crate::config::ClientConfig;
use crate::error::Ndt7Error;
use crate::locate::ServerUrls;
use crate::supervisor::Supervisor;
use crate::worker::{DownloadWorker, UploadWorker, Worker};

/// An ndt7 client bound to one configuration and one set of hooks.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    callbacks: Callbacks,
}

impl Client {
    pub fn new(config: ClientConfig, callbacks: Callbacks) -> Self {
        Self { config, callbacks }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn urls(&self) -> ServerUrls {
        ServerUrls::from_template(&self.config.url_template, &self.config.location)
    }

    fn download_worker(&self) -> DownloadWorker {
        DownloadWorker::new(self.config.measurement_interval)
    }

    fn upload_worker(&self) -> UploadWorker {
        UploadWorker::new(self.config.upload_duration, self.config.measurement_interval)
    }

    /// Run a full session and return its composite status.
    ///
    /// `final_measurements` fires once, only when both subtests succeed.
    pub async fn run(self) -> Result<TestStatus, Ndt7Error> {
        let download = self.download_worker();
        let upload = self.upload_worker();
        self.run_with(download, upload).await
    }

    /// [`Client::run`] with caller-supplied workers.
    pub async fn run_with<D: Worker, U: Worker>(
        mut self,
        download: D,
        upload: U,
    ) -> Result<TestStatus, Ndt7Error> {
        let timestamp = Utc::now();
        let urls = self.urls();
        let supervisor = Supervisor::from_config(&self.config);

        let down = supervisor
            .run(
                download,
                WorkerRequest::new(SubtestKind::Download, urls.download.clone()),
                &mut self.callbacks,
            )
            .await?;
        if !down.is_success() {
            // Upload is never attempted after a failed download.
            return Ok(TestStatus::new(down.return_code, RETURN_OK));
        }

        let up = supervisor
            .run(
                upload,
                WorkerRequest::new(SubtestKind::Upload, urls.upload.clone()),
                &mut self.callbacks,
            )
            .await?;
        let status = TestStatus::new(down.return_code, up.return_code);
        if !up.is_success() {
            return Ok(status);
        }

        match aggregate(&down, &up, urls.server_name(), timestamp) {
            Ok(results) => {
                tracing::info!(
                    download_mbps = results.bandwidth_download,
                    upload_mbps = results.bandwidth_upload,
                    rtt_ms = results.rtt,
                    jitter_ms = results.jitter,
                    retransmission_pct = results.retransmission_pct,
                    "session complete"
                );
                self.callbacks.finish(&results);
            }
            Err(e) => {
                tracing::warn!(error = %e, "session finished without results");
                self.callbacks.report(e)?;
            }
        }
        Ok(status)
    }

    /// Run the download subtest alone.
    pub async fn download(&mut self) -> Result<SubtestOutcome, Ndt7Error> {
        let worker = self.download_worker();
        self.subtest(worker, SubtestKind::Download).await
    }

    /// Run the upload subtest alone.
    pub async fn upload(&mut self) -> Result<SubtestOutcome, Ndt7Error> {
        let worker = self.upload_worker();
        self.subtest(worker, SubtestKind::Upload).await
    }

    async fn subtest<W: Worker>(
        &mut self,
        worker: W,
        kind: SubtestKind,
    ) -> Result<SubtestOutcome, Ndt7Error> {
        let url = self.urls().for_kind(kind).to_string();
        Supervisor::from_config(&self.config)
            .run(worker, WorkerRequest::new(kind, url), &mut self.callbacks)
            .await
    }
}
