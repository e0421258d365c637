use std::path::PathBuf;

use scrf_core::ScrfError;
use thiserror::Error;

/// Errors raised while reading training data, persisting parameters or
/// running the training loop.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A data file does not follow its format.
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Frame and segment batches do not line up.
    #[error("batch mismatch: {0}")]
    Mismatch(String),

    /// A loss value so far out of range that training cannot continue.
    #[error("loss {loss} on `{utterance}` diverged")]
    Diverged { utterance: String, loss: f64 },

    #[error(transparent)]
    Core(#[from] ScrfError),
}

/// Result type alias for trainer operations.
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainerError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        TrainerError::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Whether the error only concerns the current example.
    #[must_use]
    pub fn is_per_example(&self) -> bool {
        matches!(self, TrainerError::Core(e) if e.is_per_example())
    }
}
