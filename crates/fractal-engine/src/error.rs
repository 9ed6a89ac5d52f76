use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use fractal_core::PayloadError;
use thiserror::Error;

/// Failure taxonomy for one generation attempt.
///
/// `LaunchFailure`, `Timeout`, `ExternalFailure` and `MalformedOutput`
/// are recovered locally by the fallback generator and never surface
/// to the consumer as hard failures. `Busy` is an expected condition,
/// not an error in the operational sense. `FallbackExhausted` is fatal.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to launch compute binary {binary}: {source}")]
    LaunchFailure {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compute process exceeded the {timeout:?} timeout")]
    Timeout { timeout: Duration },

    #[error("compute process exited with {status}: {diagnostics}")]
    ExternalFailure {
        status: ExitStatus,
        diagnostics: String,
    },

    #[error("compute output is unusable: {0}")]
    MalformedOutput(String),

    #[error("a generation is already in progress")]
    Busy,

    #[error("fallback generator produced an invalid payload: {0}")]
    FallbackExhausted(#[from] PayloadError),
}

impl GenerateError {
    /// Whether the fallback generator may recover from this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailure { .. }
                | Self::Timeout { .. }
                | Self::ExternalFailure { .. }
                | Self::MalformedOutput(_)
        )
    }
}
