//! Wire types exchanged with the assessment, AI and FHIR services.
//!
//! Field names follow the services' camelCase JSON.

use crate::identity::{AssessmentId, JobId, PatientId, WoundId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// FHIR resource types requested on every pull.
pub const FHIR_PULL_RESOURCES: [&str; 3] = ["Patient", "Condition", "MedicationRequest"];

/// Per-class tissue coverage measured on the wound bed.
///
/// Classes are measured independently; percentages across classes may
/// overlap or leave an untyped remainder, so they need not sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissueQuant {
    pub class: String,
    pub percent: f64,
}

/// A scalar measurement with its unit, e.g. `12 cm2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

/// Output of the vision model for one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub segmentation_mask_uri: String,
    pub tissue_quant: Vec<TissueQuant>,
    pub area: Measurement,
    pub perimeter: Measurement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradcam_uri: Option<String>,
}

impl AnalysisResult {
    /// Coverage for a tissue class, if the model reported it.
    pub fn tissue_percent(&self, class: &str) -> Option<f64> {
        self.tissue_quant
            .iter()
            .find(|t| t.class.eq_ignore_ascii_case(class))
            .map(|t| t.percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfectionRisk {
    pub level: String,
    pub score: f64,
    #[serde(default)]
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingOutlook {
    pub prob_heal30: f64,
    /// Estimated days to closure.
    pub time_to_heal: f64,
    pub stagnation: bool,
    #[serde(default)]
    pub factors: Vec<String>,
}

/// Risk computed from an assessment and its analysis. Relayed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub infection: InfectionRisk,
    pub healing: HealingOutlook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAssessment {
    pub assessment_id: AssessmentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionJob {
    pub job_id: JobId,
}

/// Body of `POST /analysis/vision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionRequest {
    pub assessment_id: AssessmentId,
    pub wound_id: WoundId,
    /// Data URI or storage URI of the captured image.
    pub image_uri: String,
}

/// Body of `POST /analysis/risk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRequest {
    pub assessment_id: AssessmentId,
    pub wound_id: WoundId,
    pub analysis: AnalysisResult,
    /// Clinical form payload submitted with the capture.
    pub clinical: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirPushRequest {
    pub assessment_id: AssessmentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirPushResult {
    pub bundle_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirPullRequest {
    pub patient_id: PatientId,
    pub resources: Vec<String>,
}

impl FhirPullRequest {
    pub fn for_patient(patient_id: PatientId) -> Self {
        Self {
            patient_id,
            resources: FHIR_PULL_RESOURCES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Resources returned by a FHIR pull, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirPullResult {
    #[serde(default)]
    pub resources: Vec<Value>,
}

impl FhirPullResult {
    /// Resources whose `resourceType` matches `kind`.
    pub fn of_type<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.get("resourceType").and_then(Value::as_str) == Some(kind))
    }
}

/// Everything the UI captured for one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSubmission {
    pub wound_id: WoundId,
    pub image_uri: String,
    #[serde(default)]
    pub payload: Value,
}
