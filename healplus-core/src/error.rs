//! Error types for HealPlus operations

use crate::assessment::AssessmentStatus;
use crate::identity::AssessmentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Remote service a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    AssessmentStore,
    AiService,
    FhirGateway,
    DocumentStore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::AssessmentStore => "assessment store",
            Service::AiService => "AI service",
            Service::FhirGateway => "FHIR gateway",
            Service::DocumentStore => "document store",
        };
        f.write_str(name)
    }
}

/// Failure of a single request to a remote service.
///
/// Never retried by the layer that produces it.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// No response reached us.
    #[error("{service} unreachable: {reason}")]
    Transport { service: Service, reason: String },

    /// The service answered with a non-success status.
    #[error("{service} rejected request: {status} {reason}")]
    Rejected {
        service: Service,
        status: u16,
        reason: String,
    },

    /// The response body could not be decoded.
    #[error("{service} sent a malformed response: {reason}")]
    Decode { service: Service, reason: String },
}

impl RemoteError {
    pub fn transport(service: Service, reason: impl Into<String>) -> Self {
        Self::Transport {
            service,
            reason: reason.into(),
        }
    }

    pub fn rejected(service: Service, status: u16, reason: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            status,
            reason: reason.into(),
        }
    }

    pub fn decode(service: Service, reason: impl Into<String>) -> Self {
        Self::Decode {
            service,
            reason: reason.into(),
        }
    }

    pub fn service(&self) -> Service {
        match self {
            Self::Transport { service, .. }
            | Self::Rejected { service, .. }
            | Self::Decode { service, .. } => *service,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a poll may try again after this failure.
    ///
    /// Transport failures and "not ready / overloaded" statuses are worth
    /// another attempt; malformed bodies and other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Rejected { status, .. } => {
                matches!(status, 404 | 408 | 409 | 425 | 429) || (500..600).contains(status)
            }
            Self::Decode { .. } => false,
        }
    }
}

/// A remote document that could not be turned into a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid record {id}: {reason}")]
pub struct RecordError {
    pub id: String,
    pub reason: String,
}

/// Failures raised while driving the assessment pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(
    tag = "kind",
    content = "detail",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum PipelineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("analysis for {assessment_id} not ready after {waited:?} ({attempts} polls)")]
    AnalysisTimeout {
        assessment_id: AssessmentId,
        waited: Duration,
        attempts: u32,
        last_error: Option<RemoteError>,
    },

    #[error("cannot move assessment from {from:?} to {to:?}")]
    IllegalTransition {
        from: AssessmentStatus,
        to: AssessmentStatus,
    },

    /// A pipeline step was invoked on an assessment in the wrong state.
    #[error("{operation} is not possible while the assessment is {status:?}")]
    WrongStage {
        operation: &'static str,
        status: AssessmentStatus,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all HealPlus errors.
#[derive(Debug, Error)]
pub enum HealplusError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for HealPlus operations.
pub type HealplusResult<T> = Result<T, HealplusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::rejected(Service::AiService, 500, "Internal Server Error");
        assert_eq!(
            err.to_string(),
            "AI service rejected request: 500 Internal Server Error"
        );
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.service(), Service::AiService);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::transport(Service::AssessmentStore, "refused").is_retryable());
        assert!(RemoteError::rejected(Service::AssessmentStore, 404, "Not Found").is_retryable());
        assert!(RemoteError::rejected(Service::AssessmentStore, 503, "Unavailable").is_retryable());
        assert!(!RemoteError::rejected(Service::AssessmentStore, 400, "Bad Request").is_retryable());
        assert!(!RemoteError::rejected(Service::AssessmentStore, 401, "Unauthorized").is_retryable());
        assert!(!RemoteError::decode(Service::AssessmentStore, "eof").is_retryable());
    }

    #[test]
    fn test_pipeline_error_wraps_remote() {
        let remote = RemoteError::transport(Service::FhirGateway, "dns");
        let err: PipelineError = remote.clone().into();
        assert_eq!(err, PipelineError::Remote(remote));
        assert!(err.to_string().contains("FHIR gateway unreachable"));
    }

    #[test]
    fn test_master_error_from_config() {
        let err: HealplusError = ConfigError::InvalidValue {
            field: "endpoints.api_base",
            reason: "must not be empty".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("Config error"));
    }
}
