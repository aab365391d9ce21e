use thiserror::Error;

/// Errors that can occur while calibrating, querying, or exporting.
#[derive(Error, Debug)]
pub enum AmpooseError {
    /// IO error (file not found, permission denied, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error from the persistent store.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// URL parsing error for malformed endpoint or page URLs.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The stored calibration artifact is absent or a required operation is invalid.
    #[error("GraphQL calibration missing or invalid for: {}", .0.join(", "))]
    MissingCalibration(Vec<String>),

    /// An export run was started before calibration completed.
    #[error("Calibration required before exporting (missing: {})", .0.join(", "))]
    CalibrationRequired(Vec<String>),

    /// Every endpoint/parameter combination failed.
    #[error("GraphQL request failed: {0}")]
    RequestFailed(String),

    /// The response body was empty after trimming.
    #[error("Empty GraphQL response body")]
    EmptyResponse,

    /// The response body was not JSON or newline-delimited JSON.
    #[error("Malformed GraphQL response body: {0}")]
    MalformedResponse(String),

    /// The server rejected the request and returned no usable data.
    #[error("GraphQL errors: {0}")]
    Graphql(String),

    /// Transport-level failure for a single attempt.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request was cancelled through the shared abort signal.
    #[error("Request aborted")]
    Aborted,

    /// The download sink refused a file.
    #[error("Download failed: {0}")]
    Download(String),

    /// An operation was invoked in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid user input (flags, config, payload files).
    #[error("{0}")]
    InvalidArgs(String),
}

/// Convenience result type for ampoose operations.
pub type Result<T> = std::result::Result<T, AmpooseError>;
