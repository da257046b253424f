//! Error types for vakit
//!
//! Every fallible operation returns [`Result`], whose error side is an
//! [`Errors`] accumulator rather than a single failure. Components catch
//! their own faults and convert them here, so nothing crosses a component
//! boundary as a raw error.

use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Category of a single failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Query for an id that does not exist (404)
    NotFound,
    /// Malformed identifier, date range or configuration value (400)
    InvalidInput,
    /// Storage fault or row-count mismatch (500)
    Database,
    /// Network failure or non-success status from the provider (502)
    RequestFailed,
    /// Provider payload did not have the expected shape (502)
    ParsingFailed,
    /// Explicit deadline exceeded on a fetch or store call (504)
    Timeout,
}

impl ErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Database => "database",
            ErrorKind::RequestFailed => "request_failed",
            ErrorKind::ParsingFailed => "parsing_failed",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// HTTP status a controller would answer with for this kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::RequestFailed | ErrorKind::ParsingFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn severity(&self) -> u8 {
        match self {
            ErrorKind::NotFound => 0,
            ErrorKind::InvalidInput => 1,
            ErrorKind::RequestFailed => 2,
            ErrorKind::ParsingFailed => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::Database => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed failure with free-form details and key/value context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{kind}: {details}")]
pub struct SingleError {
    pub kind: ErrorKind,
    pub details: String,
    pub context: BTreeMap<String, String>,
}

impl SingleError {
    pub fn new(kind: ErrorKind, details: impl Into<String>) -> Self {
        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();

        Self {
            kind,
            details: details.into(),
            context: BTreeMap::new(),
        }
    }
}

/// Ordered, de-duplicated collection of failures
///
/// An empty value means unconditional success. Merging is a union that keeps
/// first-seen order, with [`Errors::empty`] as identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Errors {
    errors: Vec<SingleError>,
}

impl Errors {
    pub fn empty() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn single(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            errors: vec![SingleError::new(kind, details)],
        }
    }

    pub fn not_found(details: impl Into<String>) -> Self {
        Self::single(ErrorKind::NotFound, details)
    }

    pub fn invalid_input(details: impl Into<String>) -> Self {
        Self::single(ErrorKind::InvalidInput, details)
    }

    pub fn database(details: impl Into<String>) -> Self {
        Self::single(ErrorKind::Database, details)
    }

    pub fn request_failed(details: impl Into<String>) -> Self {
        Self::single(ErrorKind::RequestFailed, details)
    }

    pub fn parsing_failed(details: impl Into<String>) -> Self {
        Self::single(ErrorKind::ParsingFailed, details)
    }

    pub fn timeout(details: impl Into<String>) -> Self {
        Self::single(ErrorKind::Timeout, details)
    }

    /// Attach a context entry to every failure held
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        for error in &mut self.errors {
            error.context.insert(key.clone(), value.clone());
        }
        self
    }

    /// Union of both collections, keeping first-seen order
    pub fn merge(mut self, other: Errors) -> Errors {
        self.absorb(other);
        self
    }

    /// In-place variant of [`Errors::merge`]
    pub fn absorb(&mut self, other: Errors) {
        for error in other.errors {
            if !self.errors.contains(&error) {
                self.errors.push(error);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn non_empty(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SingleError> {
        self.errors.iter()
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Distinct kinds held, in first-seen order
    pub fn kinds(&self) -> Vec<ErrorKind> {
        let mut kinds = Vec::new();
        for error in &self.errors {
            if !kinds.contains(&error.kind) {
                kinds.push(error.kind);
            }
        }
        kinds
    }

    /// Status for the most severe failure held; `200 OK` when empty
    pub fn status_code(&self) -> StatusCode {
        self.errors
            .iter()
            .map(|e| e.kind)
            .max_by_key(ErrorKind::severity)
            .map(|kind| kind.status_code())
            .unwrap_or(StatusCode::OK)
    }

    /// Turn an accumulator into a result: empty means success
    pub fn into_result<T>(self, value: T) -> Result<T> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", rendered.join("; "))
    }
}

impl std::error::Error for Errors {}

impl From<SingleError> for Errors {
    fn from(error: SingleError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl From<sqlx::Error> for Errors {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Errors::timeout(err.to_string()),
            sqlx::Error::RowNotFound => Errors::not_found(err.to_string()),
            _ => Errors::database(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Errors {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Errors::database(format!("Migration failed: {err}"))
    }
}

impl From<reqwest::Error> for Errors {
    fn from(err: reqwest::Error) -> Self {
        let errors = if err.is_timeout() {
            Errors::timeout(err.to_string())
        } else {
            Errors::request_failed(err.to_string())
        };
        match err.url() {
            Some(url) => errors.with_context("url", url),
            None => errors,
        }
    }
}

impl From<serde_json::Error> for Errors {
    fn from(err: serde_json::Error) -> Self {
        Errors::parsing_failed(err.to_string())
    }
}

impl From<config::ConfigError> for Errors {
    fn from(err: config::ConfigError) -> Self {
        Errors::invalid_input(err.to_string())
    }
}

/// Result type alias using Errors
pub type Result<T> = std::result::Result<T, Errors>;
