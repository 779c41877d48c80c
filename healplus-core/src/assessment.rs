//! Assessment lifecycle.
//!
//! An [`Assessment`] is one attempt at turning a wound capture into a stored
//! assessment, a tissue analysis and (when the AI service cooperates) a risk
//! profile. Its [`AssessmentState`] carries exactly the data each stage has
//! produced, so a `RiskComputed` assessment without analysis data cannot be
//! built.
//!
//! ```text
//! Created -> AnalysisRequested -> AnalysisReady -> RiskComputed -> Synced
//!    \               \                  \                \
//!     +---------------+------------------+----------------+--> Failed
//! ```
//!
//! Transitions only move forward. `Failed` is terminal for the attempt; the
//! caller recovers by starting a new attempt with [`Assessment::restart`].

use crate::clinical::{AnalysisResult, FhirPushResult, RiskAssessment};
use crate::error::{PipelineError, RemoteError};
use crate::identity::{AssessmentId, AttemptId, JobId, Timestamp, WoundId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Flat status of an assessment, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Created,
    AnalysisRequested,
    AnalysisReady,
    RiskComputed,
    Synced,
    Failed,
}

impl AssessmentStatus {
    fn rank(self) -> Option<u8> {
        match self {
            Self::Created => Some(0),
            Self::AnalysisRequested => Some(1),
            Self::AnalysisReady => Some(2),
            Self::RiskComputed => Some(3),
            Self::Synced => Some(4),
            Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }

    /// Forward-only, one step at a time; `Failed` from any non-terminal state.
    pub fn can_transition_to(self, next: AssessmentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        }
    }
}

/// Pipeline step, used to say where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CreateAssessment,
    VisionRequest,
    AnalysisWait,
    RiskComputation,
    FhirPush,
}

/// Data held by an assessment at each point of its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AssessmentState {
    /// Submitted locally. Carries the backend id once the record exists.
    Created {
        assessment_id: Option<AssessmentId>,
    },
    AnalysisRequested {
        assessment_id: AssessmentId,
        job_id: JobId,
    },
    /// Analysis available. `risk_failure` is set when the risk step failed
    /// and the assessment is running degraded.
    AnalysisReady {
        assessment_id: AssessmentId,
        job_id: JobId,
        analysis: AnalysisResult,
        risk_failure: Option<RemoteError>,
    },
    /// `sync_failure` holds the last failed FHIR push, if any.
    RiskComputed {
        assessment_id: AssessmentId,
        analysis: AnalysisResult,
        risk: RiskAssessment,
        sync_failure: Option<RemoteError>,
    },
    Synced {
        assessment_id: AssessmentId,
        analysis: AnalysisResult,
        risk: RiskAssessment,
        sync: FhirPushResult,
    },
    Failed {
        assessment_id: Option<AssessmentId>,
        stage: Stage,
        reason: PipelineError,
    },
}

impl AssessmentState {
    pub fn status(&self) -> AssessmentStatus {
        match self {
            Self::Created { .. } => AssessmentStatus::Created,
            Self::AnalysisRequested { .. } => AssessmentStatus::AnalysisRequested,
            Self::AnalysisReady { .. } => AssessmentStatus::AnalysisReady,
            Self::RiskComputed { .. } => AssessmentStatus::RiskComputed,
            Self::Synced { .. } => AssessmentStatus::Synced,
            Self::Failed { .. } => AssessmentStatus::Failed,
        }
    }

    pub fn assessment_id(&self) -> Option<&AssessmentId> {
        match self {
            Self::Created { assessment_id } | Self::Failed { assessment_id, .. } => {
                assessment_id.as_ref()
            }
            Self::AnalysisRequested { assessment_id, .. }
            | Self::AnalysisReady { assessment_id, .. }
            | Self::RiskComputed { assessment_id, .. }
            | Self::Synced { assessment_id, .. } => Some(assessment_id),
        }
    }
}

/// One attempt at the assessment pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    attempt: AttemptId,
    wound_id: WoundId,
    created_at: Timestamp,
    updated_at: Timestamp,
    state: AssessmentState,
}

impl Assessment {
    /// A freshly submitted assessment with no backend record yet.
    pub fn new(wound_id: WoundId) -> Self {
        let now = Utc::now();
        Self {
            attempt: AttemptId::new(),
            wound_id,
            created_at: now,
            updated_at: now,
            state: AssessmentState::Created {
                assessment_id: None,
            },
        }
    }

    /// Start a new attempt for the same wound.
    ///
    /// The backend assessment id is kept when one was created, so the
    /// analysis step can be retried without creating a second record.
    pub fn restart(&self) -> Self {
        let mut next = Self::new(self.wound_id.clone());
        next.state = AssessmentState::Created {
            assessment_id: self.assessment_id().cloned(),
        };
        next
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn wound_id(&self) -> &WoundId {
        &self.wound_id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn state(&self) -> &AssessmentState {
        &self.state
    }

    pub fn status(&self) -> AssessmentStatus {
        self.state.status()
    }

    pub fn assessment_id(&self) -> Option<&AssessmentId> {
        self.state.assessment_id()
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match &self.state {
            AssessmentState::AnalysisReady { analysis, .. }
            | AssessmentState::RiskComputed { analysis, .. }
            | AssessmentState::Synced { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn risk(&self) -> Option<&RiskAssessment> {
        match &self.state {
            AssessmentState::RiskComputed { risk, .. } | AssessmentState::Synced { risk, .. } => {
                Some(risk)
            }
            _ => None,
        }
    }

    pub fn sync_result(&self) -> Option<&FhirPushResult> {
        match &self.state {
            AssessmentState::Synced { sync, .. } => Some(sync),
            _ => None,
        }
    }

    /// The reason a failed attempt stopped.
    pub fn failure(&self) -> Option<(Stage, &PipelineError)> {
        match &self.state {
            AssessmentState::Failed { stage, reason, .. } => Some((*stage, reason)),
            _ => None,
        }
    }

    /// A later step that failed without invalidating earlier results.
    pub fn degradation(&self) -> Option<(Stage, &RemoteError)> {
        match &self.state {
            AssessmentState::AnalysisReady {
                risk_failure: Some(err),
                ..
            } => Some((Stage::RiskComputation, err)),
            AssessmentState::RiskComputed {
                sync_failure: Some(err),
                ..
            } => Some((Stage::FhirPush, err)),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation().is_some()
    }

    /// Human-readable summary of the last reached state.
    pub fn describe(&self) -> String {
        match (self.failure(), self.degradation()) {
            (Some((stage, reason)), _) => format!("failed at {:?}: {}", stage, reason),
            (None, Some((stage, err))) => {
                format!("{:?} (degraded, {:?} failed: {})", self.status(), stage, err)
            }
            (None, None) => format!("{:?}", self.status()),
        }
    }

    /// Move to `next`, enforcing the forward-only lifecycle.
    ///
    /// Replacing the state with one of the same status is allowed; it is how
    /// degradation is recorded.
    pub fn advance(mut self, next: AssessmentState) -> Result<Self, PipelineError> {
        let from = self.status();
        let to = next.status();
        if from != to && !from.can_transition_to(to) {
            return Err(PipelineError::IllegalTransition { from, to });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(self)
    }

    /// Mark the attempt failed, keeping any backend id already assigned.
    ///
    /// Terminal assessments are returned unchanged.
    pub fn fail(mut self, stage: Stage, reason: PipelineError) -> Self {
        if self.status().is_terminal() {
            return self;
        }
        self.state = AssessmentState::Failed {
            assessment_id: self.assessment_id().cloned(),
            stage,
            reason,
        };
        self.updated_at = Utc::now();
        self
    }
}
