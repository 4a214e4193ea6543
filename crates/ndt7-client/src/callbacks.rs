//! User-facing event hooks.
//!
//! Every hook is optional:
//!
//! | hook                   | default                               |
//! |------------------------|---------------------------------------|
//! | `error`                | the error is returned to the caller   |
//! | `download_measurement` | no-op                                 |
//! | `upload_measurement`   | no-op                                 |
//! | `final_measurements`   | no-op                                 |

use ndt7_common::models::Results;
use ndt7_common::protocol::{ClientMeasurement, SubtestKind};

use crate::error::Ndt7Error;

pub type ErrorCallback = Box<dyn FnMut(&Ndt7Error) + Send>;
pub type MeasurementCallback = Box<dyn FnMut(&ClientMeasurement) + Send>;
pub type ResultsCallback = Box<dyn FnOnce(&Results) + Send>;

#[derive(Default)]
pub struct Callbacks {
    pub error: Option<ErrorCallback>,
    pub download_measurement: Option<MeasurementCallback>,
    pub upload_measurement: Option<MeasurementCallback>,
    pub final_measurements: Option<ResultsCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, f: impl FnMut(&Ndt7Error) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_download_measurement(
        mut self,
        f: impl FnMut(&ClientMeasurement) + Send + 'static,
    ) -> Self {
        self.download_measurement = Some(Box::new(f));
        self
    }

    pub fn on_upload_measurement(
        mut self,
        f: impl FnMut(&ClientMeasurement) + Send + 'static,
    ) -> Self {
        self.upload_measurement = Some(Box::new(f));
        self
    }

    pub fn on_final_measurements(mut self, f: impl FnOnce(&Results) + Send + 'static) -> Self {
        self.final_measurements = Some(Box::new(f));
        self
    }

    /// Hand `err` to the error hook, or give it back when there is none.
    pub(crate) fn report(&mut self, err: Ndt7Error) -> Result<(), Ndt7Error> {
        match self.error.as_mut() {
            Some(hook) => {
                hook(&err);
                Ok(())
            }
            None => Err(err),
        }
    }

    pub(crate) fn measurement(&mut self, kind: SubtestKind, data: &ClientMeasurement) {
        let hook = match kind {
            SubtestKind::Download => self.download_measurement.as_mut(),
            SubtestKind::Upload => self.upload_measurement.as_mut(),
        };
        if let Some(hook) = hook {
            hook(data);
        }
    }

    /// Fires `final_measurements` at most once.
    pub(crate) fn finish(&mut self, results: &Results) {
        if let Some(hook) = self.final_measurements.take() {
            hook(results);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("error", &self.error.is_some())
            .field("download_measurement", &self.download_measurement.is_some())
            .field("upload_measurement", &self.upload_measurement.is_some())
            .field("final_measurements", &self.final_measurements.is_some())
            .finish()
    }
}
