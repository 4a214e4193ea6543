use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Ndt7Error;
use crate::locate::DEFAULT_URL_TEMPLATE;

pub const DEFAULT_LOCATION: &str = "rj";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfigInput {
    pub location: Option<String>,
    pub url_template: Option<String>,
    pub watchdog_ms: Option<u64>,
    pub upload_duration_ms: Option<u64>,
    pub measurement_interval_ms: Option<u64>,
    pub strict_watchdog: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Location identifier substituted into `url_template`.
    pub location: String,
    /// Server URL template with `{location}` and `{subtest}` placeholders.
    pub url_template: String,
    /// Upper bound on a subtest's lifetime.
    pub watchdog: Duration,
    /// How long the upload pacing loop keeps sending.
    pub upload_duration: Duration,
    /// Minimum spacing of client-side samples.
    pub measurement_interval: Duration,
    /// Treat watchdog expiry as a failed subtest instead of a completed one.
    pub strict_watchdog: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            location: DEFAULT_LOCATION.to_string(),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            watchdog: Duration::from_millis(10_000),
            upload_duration: Duration::from_millis(10_000),
            measurement_interval: Duration::from_millis(250),
            strict_watchdog: false,
        }
    }
}

impl ClientConfigInput {
    pub fn resolve(self) -> Result<ClientConfig, Ndt7Error> {
        let defaults = ClientConfig::default();

        let location = match self.location {
            Some(loc) => {
                let trimmed = loc.trim();
                if trimmed.is_empty() {
                    return Err(Ndt7Error::Config("location must not be empty".into()));
                }
                trimmed.to_string()
            }
            None => defaults.location,
        };

        let url_template = match self.url_template {
            Some(t) => {
                let trimmed = t.trim().to_string();
                if !trimmed.contains("{subtest}") {
                    return Err(Ndt7Error::Config(format!(
                        "url_template {trimmed:?} has no {{subtest}} placeholder"
                    )));
                }
                trimmed
            }
            None => defaults.url_template,
        };

        let millis = |name: &str, value: Option<u64>, default: Duration| match value {
            Some(0) => Err(Ndt7Error::Config(format!("{name} must be greater than zero"))),
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Ok(default),
        };

        Ok(ClientConfig {
            location,
            url_template,
            watchdog: millis("watchdog_ms", self.watchdog_ms, defaults.watchdog)?,
            upload_duration: millis(
                "upload_duration_ms",
                self.upload_duration_ms,
                defaults.upload_duration,
            )?,
            measurement_interval: millis(
                "measurement_interval_ms",
                self.measurement_interval_ms,
                defaults.measurement_interval,
            )?,
            strict_watchdog: self.strict_watchdog.unwrap_or(defaults.strict_watchdog),
        })
    }

    pub fn from_toml_str(input: &str) -> Result<Self, Ndt7Error> {
        if input.trim().is_empty() {
            return Ok(ClientConfigInput::default());
        }
        toml::from_str(input).map_err(|e| Ndt7Error::Config(format!("invalid config TOML: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, Ndt7Error> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| Ndt7Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }
}

impl ClientConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, Ndt7Error> {
        ClientConfigInput::from_toml_str(input)?.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, Ndt7Error> {
        ClientConfigInput::load(path)?.resolve()
    }
}
