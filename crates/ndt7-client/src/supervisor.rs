//! Worker supervisor.
//!
//! Spawns one subtest worker, hands it its target, and interprets the
//! worker's messages until the subtest ends or the watchdog fires. Each run
//! resolves to exactly one [`SubtestOutcome`]:
//!
//! | event                              | return code |
//! |------------------------------------|-------------|
//! | `closed` with any code but 1006    | 0           |
//! | `closed` with 1006                 | 1           |
//! | `error`, malformed or absent msg   | 1           |
//! | watchdog expiry                    | 0 (1 under `strict_watchdog`) |
//!
//! The worker is terminated before the outcome is returned.

use std::time::Duration;

use ndt7_common::models::{RETURN_FAILED, RETURN_OK, SubtestOutcome};
use ndt7_common::protocol::{
    CLOSE_ABNORMAL, ClientMeasurement, Measurement, ServerMeasurement, SubtestKind,
    WorkerMessage, WorkerRequest,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::callbacks::Callbacks;
use crate::config::ClientConfig;
use crate::error::Ndt7Error;
use crate::worker::{Outbox, Worker, WorkerContext};

/// Handle to a spawned worker task. Terminates it at most once.
struct WorkerHandle {
    join: Option<JoinHandle<()>>,
    kind: SubtestKind,
}

impl WorkerHandle {
    fn terminate(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
            tracing::debug!(subtest = %self.kind, "worker terminated");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Everything gathered from one worker until it resolves.
struct Supervision {
    worker: WorkerHandle,
    kind: SubtestKind,
    rtts: Vec<u64>,
    last_client: Option<ClientMeasurement>,
    last_server: Option<ServerMeasurement>,
}

impl Supervision {
    fn record_server(&mut self, mut measurement: ServerMeasurement) {
        if let Some(rtt) = measurement.rtt() {
            self.rtts.push(rtt);
        }
        // ConnectionInfo may only come with the first message.
        if measurement.connection_info.is_none() {
            measurement.connection_info = self
                .last_server
                .as_mut()
                .and_then(|prev| prev.connection_info.take());
        }
        self.last_server = Some(measurement);
    }

    /// Terminate the worker and produce the outcome. Consumes the
    /// supervision, so a subtest resolves once.
    fn resolve(self, return_code: u8) -> SubtestOutcome {
        let Supervision {
            mut worker,
            kind,
            rtts,
            last_client,
            mut last_server,
        } = self;
        worker.terminate();

        if return_code == RETURN_OK {
            if let Some(server) = last_server.as_mut() {
                server.all_rtts = rtts;
            }
        }
        tracing::info!(subtest = %kind, return_code, "subtest resolved");
        SubtestOutcome {
            return_code,
            client: last_client,
            server: last_server,
        }
    }

    /// Resolve as failed, then report `err`.
    fn fail(
        self,
        err: Ndt7Error,
        callbacks: &mut Callbacks,
    ) -> Result<SubtestOutcome, Ndt7Error> {
        tracing::warn!(subtest = %self.kind, error = %err, "subtest failed");
        let outcome = self.resolve(RETURN_FAILED);
        callbacks.report(err)?;
        Ok(outcome)
    }
}

/// Runs subtest workers under a watchdog.
#[derive(Debug, Clone)]
pub struct Supervisor {
    watchdog: Duration,
    strict_watchdog: bool,
}

impl Supervisor {
    pub fn new(watchdog: Duration, strict_watchdog: bool) -> Self {
        Self {
            watchdog,
            strict_watchdog,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.watchdog, config.strict_watchdog)
    }

    /// Spawn `worker`, send it `request`, and wait for the subtest to end.
    ///
    /// Subtest failures are reported through `callbacks.error`; they only
    /// come back as `Err` when no error hook is set.
    pub async fn run<W: Worker>(
        &self,
        worker: W,
        request: WorkerRequest,
        callbacks: &mut Callbacks,
    ) -> Result<SubtestOutcome, Ndt7Error> {
        let kind = request.kind();
        let (request_tx, request_rx) = mpsc::channel(1);
        let (message_tx, mut message_rx) = mpsc::unbounded_channel();

        tracing::info!(subtest = %kind, url = %request.url(), "starting subtest");
        let join = tokio::spawn(worker.run(WorkerContext {
            inbox: request_rx,
            outbox: Outbox::new(message_tx),
        }));
        let mut supervision = Supervision {
            worker: WorkerHandle {
                join: Some(join),
                kind,
            },
            kind,
            rtts: Vec::new(),
            last_client: None,
            last_server: None,
        };

        if request_tx.send(request).await.is_err() {
            let err = Ndt7Error::Protocol {
                subtest: kind,
                message: format!("{kind} error"),
            };
            return supervision.fail(err, callbacks);
        }

        let watchdog = tokio::time::sleep(self.watchdog);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                biased;

                msg = message_rx.recv() => match msg {
                    Some(WorkerMessage::Measurement(Measurement::Server { raw })) => {
                        match serde_json::from_str::<ServerMeasurement>(&raw) {
                            Ok(measurement) => supervision.record_server(measurement),
                            Err(e) => {
                                let err = Ndt7Error::Protocol {
                                    subtest: kind,
                                    message: format!("{kind}: malformed server measurement: {e}"),
                                };
                                return supervision.fail(err, callbacks);
                            }
                        }
                    }
                    Some(WorkerMessage::Measurement(Measurement::Client { data, .. })) => {
                        tracing::debug!(
                            subtest = %kind,
                            elapsed_s = data.elapsed_time,
                            num_bytes = data.num_bytes,
                            mbps = data.mean_client_mbps,
                            "client measurement"
                        );
                        supervision.last_client = Some(data);
                        callbacks.measurement(kind, &data);
                    }
                    Some(WorkerMessage::Closed { code }) if code == CLOSE_ABNORMAL => {
                        return supervision.fail(Ndt7Error::Connection { subtest: kind }, callbacks);
                    }
                    Some(WorkerMessage::Closed { code }) => {
                        tracing::debug!(subtest = %kind, code, "subtest closed");
                        return Ok(supervision.resolve(RETURN_OK));
                    }
                    Some(WorkerMessage::Error { error }) => {
                        let err = Ndt7Error::Protocol {
                            subtest: kind,
                            message: error.unwrap_or_else(|| format!("{kind} error")),
                        };
                        return supervision.fail(err, callbacks);
                    }
                    None => {
                        let err = Ndt7Error::Protocol {
                            subtest: kind,
                            message: format!("{kind} error"),
                        };
                        return supervision.fail(err, callbacks);
                    }
                },

                _ = &mut watchdog => {
                    if self.strict_watchdog {
                        let err = Ndt7Error::Timeout { subtest: kind, after: self.watchdog };
                        return supervision.fail(err, callbacks);
                    }
                    tracing::warn!(
                        subtest = %kind,
                        after_ms = self.watchdog.as_millis() as u64,
                        "watchdog expired, resolving subtest as complete"
                    );
                    return Ok(supervision.resolve(RETURN_OK));
                }
            }
        }
    }
}
