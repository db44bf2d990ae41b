use thiserror::Error;

use crate::provider::{ProviderId, SnapshotKey, SourceType};

/// Failure of a single external fetch. Always recovered inside the
/// scheduler; never surfaced to prediction callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: ProviderId, reason: String },

    #[error("provider {provider} reported its daily quota exhausted")]
    QuotaExhausted { provider: ProviderId },

    #[error("malformed {feed} payload: {reason}")]
    MalformedPayload { feed: SourceType, reason: String },

    #[error("acquisition cancelled")]
    Cancelled,
}

impl AcquisitionError {
    pub fn unavailable(provider: &ProviderId, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.clone(),
            reason: reason.into(),
        }
    }

    pub fn malformed(feed: SourceType, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            feed,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("payload of type {payload} cannot be stored under {key}")]
    SourceMismatch { key: SnapshotKey, payload: SourceType },

    #[error("{key} is anchored to a kickoff that has already passed")]
    Retired { key: SnapshotKey },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("unsupported config version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error("unknown match {0}")]
    UnknownMatch(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("provider {0} is not configured")]
    UnknownProvider(ProviderId),

    #[error("provider {provider} does not serve {feed}")]
    NotServed {
        provider: ProviderId,
        feed: SourceType,
    },

    #[error("quota refused for provider {0}")]
    QuotaRefused(ProviderId),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
