//! Error taxonomy. Every collaborator boundary has its own enum; the crate
//! level `Error` only exists for the binary's `main`.

use crate::state_machine::CelebrationPhase;

/// Failure to acquire or run the microphone stream.
/// Never fatal: the caller degrades to the manual-only flow.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    Denied(String),
    #[error("no audio input device available")]
    NoDevice,
    #[error("audio capture unsupported: {0}")]
    Unsupported(String),
    #[error("audio stream failed: {0}")]
    Stream(String),
}

/// A gesture arrived that the current phase does not accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("gesture `{gesture}` not valid in phase {phase}")]
    InvalidGesture {
        gesture: &'static str,
        phase: CelebrationPhase,
    },
    #[error("manual skip is disabled")]
    SkipDisabled,
    #[error("a song must be chosen before cutting the cake")]
    NoSongChosen,
    #[error("celebration already finished")]
    Finished,
}

/// Wish or image generation failure.
#[derive(Debug, thiserror::Error)]
pub enum WishError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("generation timeout")]
    Timeout,
    #[error("API key not configured (set {0})")]
    MissingApiKey(String),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("generation cancelled")]
    Cancelled,
}

/// Application flow failure, already phrased for the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("name is required")]
    MissingName,
    #[error("a wish is already being generated")]
    Busy,
    #[error("{0}")]
    Generation(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedded image is not valid base64: {0}")]
    Image(#[from] base64::DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error for the binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Wish(#[from] WishError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

pub type Result<T> = std::result::Result<T, Error>;
