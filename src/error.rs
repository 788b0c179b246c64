//! Error types for chapter-dl
//!
//! This module provides error handling for the library:
//! - Domain-specific error types (fetch, parse, storage, queue state machine)
//! - Machine-readable error codes carried by `JobFailed` events
//! - Conversion into the [`JobFailure`] payload

use crate::types::{JobFailure, JobId, JobStatus};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for chapter-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chapter-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Remote page could not be retrieved
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Source markup did not match the expected shape
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Queue state machine violation (programming error)
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        /// Job whose transition was rejected
        job_id: JobId,
        /// Current state
        from: JobStatus,
        /// Requested state
        to: JobStatus,
    },

    /// No registered provider matches the URL
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// A chapter index scrape returned no chapters
    #[error("chapter index for {url} returned no chapters")]
    EmptyChapterList {
        /// Index URL that was scraped
        url: String,
    },

    /// Story, chapter or job not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Chapter index range is inverted or out of bounds
    #[error("invalid chapter range {start}..={end} for {len} chapters")]
    InvalidRange {
        /// First index requested
        start: usize,
        /// Last index requested
        end: usize,
        /// Number of chapters in the story
        len: usize,
    },

    /// Persistence layer failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_concurrency")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors retrieving a remote page
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete within the fetch timeout
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout {
        /// Requested URL
        url: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The server answered with a non-2xx status
    #[error("request to {url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Connection, TLS or body decoding failure
    #[error("request to {url} failed: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// Underlying error message
        message: String,
    },
}

/// Errors extracting data from source markup
#[derive(Debug, Error)]
pub enum ParseError {
    /// An expected element was not found
    #[error("missing {what} in page from {provider}")]
    MissingElement {
        /// Provider that parsed the page
        provider: String,
        /// Description of the missing element
        what: String,
    },

    /// The page was found but its content was not usable
    #[error("invalid content from {provider}: {reason}")]
    InvalidContent {
        /// Provider that parsed the page
        provider: String,
        /// Why the content was rejected
        reason: String,
    },
}

/// Errors from the story store or chapter writer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open or connect to the backing store
    #[error("failed to open store: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored snapshot could not be decoded
    #[error("corrupt record {key}: {reason}")]
    Corrupt {
        /// Key of the corrupt record
        key: String,
        /// Decoding error
        reason: String,
    },

    /// Chapter body could not be written
    #[error("failed to write chapter body {path}: {reason}")]
    WriteFailed {
        /// Target path
        path: String,
        /// Underlying error
        reason: String,
    },
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Fetch(e) => match e {
                FetchError::Timeout { .. } => "fetch_timeout",
                FetchError::Status { .. } => "fetch_status",
                FetchError::Network { .. } => "fetch_network",
            },
            Error::Parse(_) => "parse_error",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::UnsupportedSource(_) => "unsupported_source",
            Error::EmptyChapterList { .. } => "empty_chapter_list",
            Error::NotFound(_) => "not_found",
            Error::InvalidRange { .. } => "invalid_range",
            Error::Storage(_) => "storage_error",
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<&Error> for JobFailure {
    fn from(error: &Error) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::QueryFailed(e.to_string())
    }
}
