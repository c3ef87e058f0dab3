use thiserror::Error;

use crate::models::LocationId;

/// Input rejected before any lookup is attempted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidRequest {
    #[error("invalid coordinates ({latitude}, {longitude})")]
    Coordinates { latitude: f64, longitude: f64 },
    #[error("unknown metric type `{0}`")]
    UnknownMetric(String),
    #[error("location name must not be empty")]
    EmptyName,
    #[error("{0}")]
    Malformed(String),
}

/// Failure of a single provider lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("provider credentials missing or rejected")]
    Unauthenticated,
    #[error("no data for region")]
    NoDataForRegion,
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider rate limit reached")]
    RateLimited,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("location {0} not found")]
    NotFound(LocationId),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
