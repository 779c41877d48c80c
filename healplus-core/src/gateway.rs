//! Contract of the remote assessment, AI and FHIR services.

use crate::clinical::{
    AnalysisResult, CreatedAssessment, FhirPullResult, FhirPushResult, RiskAssessment,
    RiskRequest, VisionJob, VisionRequest,
};
use crate::error::RemoteError;
use crate::identity::{AssessmentId, PatientId, WoundId};
use async_trait::async_trait;
use serde_json::Value;

/// Result type of a single gateway call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// One request/response operation per external capability.
///
/// Implementations classify failures into [`RemoteError`] and never retry;
/// retry policy belongs to the caller and differs per step.
#[async_trait]
pub trait AssessmentGateway: Send + Sync {
    /// `POST /wounds/{woundId}/assessments`
    async fn create_assessment(
        &self,
        wound_id: &WoundId,
        payload: &Value,
    ) -> RemoteResult<CreatedAssessment>;

    /// `GET /assessments/{assessmentId}/analysis`
    async fn get_analysis(&self, assessment_id: &AssessmentId) -> RemoteResult<AnalysisResult>;

    /// `POST /analysis/vision`
    async fn request_vision_analysis(&self, input: &VisionRequest) -> RemoteResult<VisionJob>;

    /// `POST /analysis/risk`
    async fn get_risk(&self, input: &RiskRequest) -> RemoteResult<RiskAssessment>;

    /// `POST /fhir/sync/push`
    async fn fhir_push(&self, assessment_id: &AssessmentId) -> RemoteResult<FhirPushResult>;

    /// `POST /fhir/sync/pull`
    async fn fhir_pull(&self, patient_id: &PatientId) -> RemoteResult<FhirPullResult>;
}
