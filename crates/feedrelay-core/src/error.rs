use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation and contract errors exposed by `feedrelay-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source id cannot be empty")]
    EmptySourceId,
    #[error("source '{id}' is not in the catalog")]
    UnknownSource { id: String },
    #[error("duplicate source id '{id}' in catalog")]
    DuplicateSourceId { id: String },

    #[error("source '{id}' is not a state-level source and cannot be fanned out")]
    NotJurisdictional { id: String },
    #[error("target count must be greater than zero")]
    EmptyTarget,

    #[error("date range start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },
    #[error("date must be YYYY-MM-DD or RFC3339: '{value}'")]
    InvalidDate { value: String },

    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("invalid parameter '{value}', expected key=value")]
    InvalidParam { value: String },

    #[error("request id must be at least 8 characters")]
    InvalidRequestId,
    #[error("schema version must look like v1.0.0: '{value}'")]
    InvalidSchemaVersion { value: String },
    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Fetch failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    UnknownSource,
    MissingKey,
    MissingServerKey,
    RequiresConfig,
    FetchFailed,
    InvalidRss,
    RateLimited,
    UpstreamStatus,
}

impl FetchErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownSource => "unknown_source",
            Self::MissingKey => "missing_key",
            Self::MissingServerKey => "missing_server_key",
            Self::RequiresConfig => "requires_config",
            Self::FetchFailed => "fetch_failed",
            Self::InvalidRss => "invalid_rss",
            Self::RateLimited => "rate_limited",
            Self::UpstreamStatus => "upstream_status",
        }
    }
}

impl Display for FetchErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fetch error carried through the relay chain and fallback tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    http_status: Option<u16>,
    retry_after_secs: Option<u64>,
    retryable: bool,
}

impl FetchError {
    pub fn unknown_source(id: &str) -> Self {
        Self::new(
            FetchErrorKind::UnknownSource,
            format!("source '{id}' is not in the catalog"),
            false,
        )
    }

    pub fn missing_key(id: &str) -> Self {
        Self::new(
            FetchErrorKind::MissingKey,
            format!("source '{id}' requires an API key from the caller"),
            false,
        )
    }

    pub fn missing_server_key(id: &str, group: &str) -> Self {
        Self::new(
            FetchErrorKind::MissingServerKey,
            format!("source '{id}' requires server key group '{group}'"),
            false,
        )
    }

    pub fn requires_config(id: &str) -> Self {
        Self::new(
            FetchErrorKind::RequiresConfig,
            format!("source '{id}' has no URL configured"),
            false,
        )
    }

    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::FetchFailed, message, true)
    }

    pub fn invalid_rss(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidRss, message, true)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let mut error = Self::new(FetchErrorKind::RateLimited, message, true);
        error.http_status = Some(429);
        error.retry_after_secs = retry_after_secs;
        error
    }

    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        let mut error = Self::new(FetchErrorKind::UpstreamStatus, message, status >= 500);
        error.http_status = Some(status);
        error
    }

    fn new(kind: FetchErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            retry_after_secs: None,
            retryable,
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub const fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_secs
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

impl AsRef<FetchError> for FetchError {
    fn as_ref(&self) -> &FetchError {
        self
    }
}
