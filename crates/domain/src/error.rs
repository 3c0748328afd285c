/// Shared error type used across all CoachScribe crates.
///
/// Every failure that can reach a caller carries a stable machine-readable
/// code (see [`Error::code`]); messages are diagnostics and may change.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested entity does not exist or is not owned by the caller.
    #[error("not found")]
    NotFound,

    /// An illegal state transition or a lost compare-and-set race.
    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("file too large: {size_mb:.2} MB exceeds plan limit of {limit_mb} MB")]
    FileTooLarge { size_mb: f64, limit_mb: u32 },

    /// The audio object is missing from blob storage.
    #[error("audio missing: {0}")]
    AudioMissing(String),

    #[error("provider {provider} does not support language {language}")]
    LangNotSupported { provider: String, language: String },

    /// A plan-limit admission failure, with the evaluator's snapshot.
    #[error("quota exceeded: {used} of {limit} {unit}")]
    QuotaExceeded {
        used: i64,
        limit: i64,
        unit: &'static str,
    },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The session has no transcript to serve (not COMPLETED, or empty).
    #[error("transcript unavailable")]
    TranscriptUnavailable,

    /// A worker died between provider success and the completion write.
    #[error("worker lost")]
    WorkerLost,

    /// Upstream provider failure after retry exhaustion.
    #[error("upstream failed: {0}")]
    UpstreamFailed(String),

    /// Input-shape failure; rejected before any state change.
    #[error("validation: {0}")]
    Validation(String),

    /// A permanent provider-side rejection (malformed audio, bad request).
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable identifier surfaced to callers. Messages may change freely;
    /// these codes may not.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound => "NOT_FOUND",
            Error::StateConflict(_) => "STATE_CONFLICT",
            Error::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Error::AudioMissing(_) => "AUDIO_MISSING",
            Error::LangNotSupported { .. } => "LANG_NOT_SUPPORTED",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::InvalidFormat(_) => "INVALID_FORMAT",
            Error::TranscriptUnavailable => "TRANSCRIPT_UNAVAILABLE",
            Error::WorkerLost => "WORKER_LOST",
            Error::UpstreamFailed(_) | Error::Provider { .. } | Error::Http(_) | Error::Timeout(_) => {
                "UPSTREAM_FAILED"
            }
            Error::Validation(_) => "VALIDATION",
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Other(_) => "INTERNAL",
        }
    }

    /// Whether a worker run may retry this failure within its backoff budget.
    ///
    /// Transport-level failures are transient; provider rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
