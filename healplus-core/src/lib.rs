//! HealPlus Core - shared types for the sync and assessment pipeline.
//!
//! Pure data structures, the error taxonomy, configuration and the gateway
//! contract. All other crates depend on this one.

pub mod assessment;
pub mod clinical;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod record;

pub use assessment::{Assessment, AssessmentState, AssessmentStatus, Stage};
pub use clinical::{
    AnalysisResult, AssessmentSubmission, CreatedAssessment, FhirPullRequest, FhirPullResult,
    FhirPushRequest, FhirPushResult, HealingOutlook, InfectionRisk, Measurement, RiskAssessment,
    RiskRequest, TissueQuant, VisionJob, VisionRequest, FHIR_PULL_RESOURCES,
};
pub use config::{CacheSettings, ClientConfig, EndpointConfig, PollConfig};
pub use error::{
    ConfigError, HealplusError, HealplusResult, PipelineError, RecordError, RemoteError, Service,
};
pub use gateway::{AssessmentGateway, RemoteResult};
pub use identity::{
    AssessmentId, AttemptId, CacheKey, Clock, JobId, PatientId, SystemClock, Timestamp, WoundId,
};
pub use record::{is_newest_first, sort_newest_first, CollectionRecord, CREATED_AT_FIELD};
