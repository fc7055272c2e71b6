use std::path::PathBuf;

use thiserror::Error;

use crate::model::Source;

pub type Result<T, E = ClimateError> = std::result::Result<T, E>;

/// Every failure the acquisition pipeline can surface.
///
/// Location-scoped variants (`SourceUnavailable`, `SourceFailed`,
/// `AllSourcesFailed`) always carry the location name so a batch driver can
/// report partial success.
#[derive(Debug, Error)]
pub enum ClimateError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Authentication rejected by {provider}: {message}")]
    Authentication { provider: Source, message: String },

    #[error("Rate limit exceeded for {provider}")]
    RateLimit { provider: Source },

    #[error("No data from {provider}: {message}")]
    NoData { provider: Source, message: String },

    #[error("Transport failure talking to {provider}: {message}")]
    Transport { provider: Source, message: String },

    #[error("Unexpected response format from {provider}: {message}")]
    ProviderFormat { provider: Source, message: String },

    #[error("{provider} unavailable for '{location}' after {attempts} attempt(s)")]
    SourceUnavailable {
        location: String,
        provider: Source,
        attempts: u32,
        #[source]
        source: Box<ClimateError>,
    },

    #[error("{provider} failed for '{location}'")]
    SourceFailed {
        location: String,
        provider: Source,
        #[source]
        source: Box<ClimateError>,
    },

    #[error("All sources failed for '{location}' (primary: {primary}; secondary: {secondary})")]
    AllSourcesFailed {
        location: String,
        primary: Box<ClimateError>,
        secondary: Box<ClimateError>,
    },

    #[error("No input to aggregate: {what}")]
    EmptyInput { what: String },

    #[error("Record for {found} does not belong to period {expected}")]
    MixedPeriod { expected: String, found: String },

    #[error("Failed to export '{path}': {message}")]
    Export { path: PathBuf, message: String },

    #[error("Data frame error: {0}")]
    Frame(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClimateError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn empty_input<S: Into<String>>(what: S) -> Self {
        Self::EmptyInput { what: what.into() }
    }

    /// Transient failures worth re-issuing the same request for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Transport { .. })
    }

    /// Name of the location a per-location error refers to, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::SourceUnavailable { location, .. }
            | Self::SourceFailed { location, .. }
            | Self::AllSourcesFailed { location, .. } => Some(location),
            _ => None,
        }
    }
}
