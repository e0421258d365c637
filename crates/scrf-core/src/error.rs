use thiserror::Error;

/// Errors that can occur while building, decoding or scoring automata.
#[derive(Debug, Error)]
pub enum ScrfError {
    /// The automaton violates a structural invariant (time stamps, missing
    /// initial/final vertices, dangling edge endpoints, epsilon cycles).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Shortest-path search reached no final vertex with a finite score.
    #[error("no path from an initial to a final vertex")]
    NoPath,

    /// Forward, backward and decoder totals disagree beyond tolerance.
    #[error(
        "numerical inconsistency: forward {forward}, backward {backward}, decoder {decoder:?}"
    )]
    NumericalInconsistency {
        /// Total accumulated at the final vertices.
        forward: f64,
        /// Total accumulated at the initial vertices.
        backward: f64,
        /// Best edge max-marginal, when the check involves the decoder.
        decoder: Option<f64>,
    },

    /// A configuration string names no known feature, loss or optimizer.
    #[error("unknown configuration: {0}")]
    UnknownConfig(String),

    /// A configuration value is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidConfig {
        /// Dotted name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A segment whose start is not strictly before its end.
    #[error("invalid segment [{start}, {end})")]
    InvalidSegment {
        /// Start time.
        start: i64,
        /// End time.
        end: i64,
    },
}

/// Result type alias for scrf operations.
pub type Result<T> = std::result::Result<T, ScrfError>;

impl ScrfError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ScrfError::MalformedInput(msg.into())
    }

    pub fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        ScrfError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error only concerns the current example.
    ///
    /// A training loop skips the example on these and carries on; any other
    /// error is a setup or input problem that should stop the run.
    #[must_use]
    pub fn is_per_example(&self) -> bool {
        matches!(
            self,
            ScrfError::NoPath | ScrfError::NumericalInconsistency { .. }
        )
    }
}
