use std::time::Duration;

use ndt7_common::protocol::SubtestKind;
use thiserror::Error;

/// Message reported when a subtest's connection closes with code 1006.
pub const ABNORMAL_CLOSURE_MESSAGE: &str =
    "The connection was closed abnormally, or could not be opened properly";

#[derive(Debug, Error)]
pub enum Ndt7Error {
    /// A worker sent an error, an undecodable payload, or went away without
    /// a terminal message.
    #[error("{message}")]
    Protocol { subtest: SubtestKind, message: String },
    #[error("{}", ABNORMAL_CLOSURE_MESSAGE)]
    Connection { subtest: SubtestKind },
    #[error("{subtest} did not finish within {after:?}")]
    Timeout { subtest: SubtestKind, after: Duration },
    #[error("cannot compute results: {0}")]
    Aggregation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Ndt7Error {
    /// The subtest the error came from, if any.
    pub fn subtest(&self) -> Option<SubtestKind> {
        match self {
            Ndt7Error::Protocol { subtest, .. }
            | Ndt7Error::Connection { subtest }
            | Ndt7Error::Timeout { subtest, .. } => Some(*subtest),
            Ndt7Error::Aggregation(_) | Ndt7Error::Config(_) => None,
        }
    }
}
