//! Crate-wide error hierarchy for the review orchestrator.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server, etc.).
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.
//!
//! Every kind named by the error-handling design (network, auth, rate_limited,
//! platform_rejected, malformed_model_output, checkpoint_decode,
//! incremental_diverged, incremental_missing_base, post_failed, fatal) maps to
//! a variant below. `CheckpointDecode` and `Incremental` are recovered locally
//! by their callers (fallback to full review) and should rarely escape the
//! orchestrator boundary.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type OrchResult<T> = Result<T, Error>;

/// Root error type for the orchestrator crate.
#[derive(Debug, Error)]
pub enum Error {
    /// VCS (GitLab/GitHub) related failure.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// Unified diff parsing failure.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Checkpoint JSON decode failure (callers fall back to full review).
    #[error("checkpoint decode error: {0}")]
    CheckpointDecode(String),

    /// Incremental diff could not be computed (force push, gc'd base, etc).
    #[error("incremental diff unavailable: {0}")]
    Incremental(String),

    /// Configuration problems (bad/missing tokens, base URL, etc.).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A single comment failed to post; recorded, never fatal to the review.
    #[error("post failed for {path}:{line}: {reason}")]
    PostFailed {
        path: String,
        line: usize,
        reason: String,
    },

    /// The model's output could not be parsed at all.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),

    /// Input validation errors (bad IDs, unsupported flavors, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unrecoverable error; triggers the best-effort summary-only post.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Detailed VCS-specific error used inside the adapter layer.
#[derive(Debug, Error)]
pub enum VcsError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429).
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Gateway/Server error (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Other HTTP status (4xx/3xx) not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Timeout at transport level.
    #[error("timeout")]
    Timeout,

    /// Network/transport failure without status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// JSON deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Unexpected/invalid shape of provider response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Platform rejected the request for policy reasons (e.g. own-PR approval).
    #[error("platform rejected: {0}")]
    PlatformRejected(String),

    /// Operation not supported by this adapter.
    #[error("unsupported vcs operation")]
    Unsupported,
}

/// Unified diff parser errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid hunk header: {0}")]
    InvalidHunkHeader(String),

    #[error("unexpected end of input")]
    UnexpectedEof,
}

/// Configuration and setup errors (base API URL, missing token, etc.).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing provider token")]
    MissingToken,

    #[error("invalid base api url: {0}")]
    InvalidBaseUrl(String),

    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

// ===== Conversions for `?` ergonomics =====

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Vcs(VcsError::from(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Vcs(VcsError::Serde(e))
    }
}

impl From<reqwest::Error> for VcsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return VcsError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => VcsError::Unauthorized,
                403 => VcsError::Forbidden,
                404 => VcsError::NotFound,
                429 => VcsError::RateLimited {
                    retry_after_secs: None,
                },
                500..=599 => VcsError::Server(code),
                _ => VcsError::HttpStatus(code),
            };
        }
        VcsError::Network(e.to_string())
    }
}
