use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors that can occur when using the Chanjing SDK.
#[derive(Error, Debug)]
pub enum ChanjingError {
    /// No usable credentials were found.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A local input file does not exist.
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Local input was rejected before anything was sent (empty text, audio too short, ...).
    #[error("invalid input: {0}")]
    Validation(String),

    /// The access token was still rejected after a refresh (codes 10400/10401).
    #[error("access token rejected (code={code}): {message}; check app_id / secret_key")]
    PermissionDenied { code: i64, message: String },

    /// A polling loop exceeded its maximum wait.
    #[error("{operation} timed out after {waited:?}")]
    Timeout { operation: String, waited: Duration },

    /// The platform refused to charge the account.
    #[error("insufficient balance, recharge at https://www.chanjing.cc (API said: {message})")]
    Billing { message: String },

    /// The platform answered with a non-zero business code.
    #[error("API error (code={code}): {message}")]
    Api { code: i64, message: String },

    /// A remote job reached a terminal failure state.
    #[error("processing failed: {0}")]
    Processing(String),

    /// An uploaded file was rejected or removed by the platform.
    #[error("file {file_id} unavailable (status={status}): {reason}")]
    FileUnavailable {
        file_id: String,
        status: i64,
        reason: &'static str,
    },

    /// Uploading to the signed URL failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// A polling loop saw too many consecutive status-query failures.
    #[error("{operation}: {attempts} consecutive status queries failed: {source}")]
    PollAborted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<ChanjingError>,
    },

    /// Connection errors or timeouts persisted through every retry.
    #[error("request failed after {attempts} attempts: {source}")]
    Connectivity {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// A transport-level or HTTP status error from reqwest.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An I/O error, typically from reading a local file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A response body could not be decoded.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChanjingError {
    /// Network hiccups, HTTP error statuses and undecodable bodies. Polling
    /// loops retry these.
    pub fn is_transient(&self) -> bool {
        match self {
            ChanjingError::Connectivity { .. } | ChanjingError::Json(_) => true,
            ChanjingError::Http(e) => {
                e.is_connect() || e.is_timeout() || e.is_decode() || e.is_status()
            }
            _ => false,
        }
    }
}

/// A convenience alias for `Result<T, ChanjingError>`.
pub type Result<T> = std::result::Result<T, ChanjingError>;
