//! Drives one wound capture through the remote services.
//!
//! Retry policy lives here and differs per step: assessment creation and the
//! vision request are tried once, the analysis is polled at a fixed interval
//! up to a deadline, risk computation and FHIR push are tried once and their
//! failures degrade the assessment instead of failing it.

use healplus_core::{
    Assessment, AssessmentGateway, AssessmentState, AssessmentStatus, AssessmentSubmission,
    FhirPullResult, PatientId, PipelineError, PollConfig, RemoteResult, RiskRequest, Stage,
    VisionRequest,
};
use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Runs the assessment state machine against an [`AssessmentGateway`].
///
/// Every step takes the assessment by value and hands back its successor.
/// Remote failures are recorded in the returned state; `Err` is reserved for
/// steps invoked on an assessment in the wrong state.
pub struct AssessmentOrchestrator<G> {
    gateway: G,
    poll: PollConfig,
}

impl<G: AssessmentGateway> AssessmentOrchestrator<G> {
    pub fn new(gateway: G, poll: PollConfig) -> Self {
        Self { gateway, poll }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Full pipeline for a new capture. Pushes to FHIR when `sync_fhir` is
    /// set and risk was computed.
    pub async fn run(
        &self,
        submission: &AssessmentSubmission,
        sync_fhir: bool,
    ) -> PipelineResult<Assessment> {
        let assessment = Assessment::new(submission.wound_id.clone());
        info!(
            attempt = %assessment.attempt(),
            wound_id = %submission.wound_id,
            "assessment started"
        );
        self.drive(assessment, submission, sync_fhir).await
    }

    /// Start a new attempt for an assessment that failed after its backend
    /// id was assigned, reusing that id.
    pub async fn retry_analysis(
        &self,
        failed: &Assessment,
        submission: &AssessmentSubmission,
        sync_fhir: bool,
    ) -> PipelineResult<Assessment> {
        if failed.status() != AssessmentStatus::Failed || failed.assessment_id().is_none() {
            return Err(PipelineError::WrongStage {
                operation: "retry_analysis",
                status: failed.status(),
            });
        }
        let assessment = failed.restart();
        info!(
            attempt = %assessment.attempt(),
            previous_attempt = %failed.attempt(),
            assessment_id = ?assessment.assessment_id(),
            "assessment analysis retried"
        );
        self.drive(assessment, submission, sync_fhir).await
    }

    async fn drive(
        &self,
        assessment: Assessment,
        submission: &AssessmentSubmission,
        sync_fhir: bool,
    ) -> PipelineResult<Assessment> {
        let assessment = self.request_analysis(assessment, submission).await?;
        if assessment.status() != AssessmentStatus::AnalysisRequested {
            return Ok(assessment);
        }
        let assessment = self.await_analysis(assessment).await?;
        if assessment.status() != AssessmentStatus::AnalysisReady {
            return Ok(assessment);
        }
        let assessment = self.compute_risk(assessment, &submission.payload).await?;
        if sync_fhir && assessment.status() == AssessmentStatus::RiskComputed {
            return self.sync_fhir(assessment).await;
        }
        Ok(assessment)
    }

    /// `Created -> AnalysisRequested`.
    ///
    /// Creates the backend assessment unless the attempt already carries an
    /// id, then requests the vision analysis. Either failure fails the
    /// assessment, keeping the id if one was assigned.
    pub async fn request_analysis(
        &self,
        assessment: Assessment,
        submission: &AssessmentSubmission,
    ) -> PipelineResult<Assessment> {
        require(&assessment, AssessmentStatus::Created, "request_analysis")?;

        let (assessment, assessment_id) = match assessment.assessment_id().cloned() {
            Some(id) => (assessment, id),
            None => {
                let created = self
                    .gateway
                    .create_assessment(assessment.wound_id(), &submission.payload)
                    .await;
                match created {
                    Ok(created) => {
                        let id = created.assessment_id;
                        info!(attempt = %assessment.attempt(), assessment_id = %id, "assessment created");
                        let assessment = assessment.advance(AssessmentState::Created {
                            assessment_id: Some(id.clone()),
                        })?;
                        (assessment, id)
                    }
                    Err(err) => {
                        warn!(attempt = %assessment.attempt(), error = %err, "assessment creation failed");
                        return Ok(assessment.fail(Stage::CreateAssessment, err.into()));
                    }
                }
            }
        };

        let request = VisionRequest {
            assessment_id: assessment_id.clone(),
            wound_id: assessment.wound_id().clone(),
            image_uri: submission.image_uri.clone(),
        };
        match self.gateway.request_vision_analysis(&request).await {
            Ok(job) => {
                info!(assessment_id = %assessment_id, job_id = %job.job_id, "analysis requested");
                assessment.advance(AssessmentState::AnalysisRequested {
                    assessment_id,
                    job_id: job.job_id,
                })
            }
            Err(err) => {
                warn!(assessment_id = %assessment_id, error = %err, "vision request failed");
                Ok(assessment.fail(Stage::VisionRequest, err.into()))
            }
        }
    }

    /// `AnalysisRequested -> AnalysisReady`.
    ///
    /// Polls immediately, then every `interval` while the failure is
    /// retryable and another poll still fits in `max_wait`. A poll still in
    /// flight at the deadline is abandoned. A non-retryable failure or
    /// running out of time fails the assessment.
    pub async fn await_analysis(&self, assessment: Assessment) -> PipelineResult<Assessment> {
        let (assessment_id, job_id) = match assessment.state() {
            AssessmentState::AnalysisRequested {
                assessment_id,
                job_id,
            } => (assessment_id.clone(), job_id.clone()),
            _ => return Err(wrong_stage(&assessment, "await_analysis")),
        };

        let interval = self.poll.interval();
        let started = Instant::now();
        let deadline = started + self.poll.max_wait();
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            attempts += 1;
            let polled = timeout_at(deadline, self.gateway.get_analysis(&assessment_id)).await;
            match polled {
                Ok(Ok(analysis)) => {
                    info!(assessment_id = %assessment_id, attempts, "analysis ready");
                    return assessment.advance(AssessmentState::AnalysisReady {
                        assessment_id,
                        job_id,
                        analysis,
                        risk_failure: None,
                    });
                }
                Ok(Err(err)) if !err.is_retryable() => {
                    warn!(assessment_id = %assessment_id, error = %err, "analysis poll failed");
                    return Ok(assessment.fail(Stage::AnalysisWait, err.into()));
                }
                Ok(Err(err)) => {
                    debug!(assessment_id = %assessment_id, attempts, error = %err, "analysis not ready");
                    last_error = Some(err);
                    if Instant::now() + interval > deadline {
                        break;
                    }
                    tokio::time::sleep(interval).await;
                }
                Err(_) => {
                    debug!(assessment_id = %assessment_id, attempts, "analysis poll still pending at deadline");
                    break;
                }
            }
        }

        let waited = started.elapsed();
        warn!(assessment_id = %assessment_id, attempts, waited_ms = waited.as_millis() as u64, "analysis timed out");
        Ok(assessment.fail(
            Stage::AnalysisWait,
            PipelineError::AnalysisTimeout {
                assessment_id,
                waited,
                attempts,
                last_error,
            },
        ))
    }

    /// `AnalysisReady -> RiskComputed`.
    ///
    /// On failure the assessment stays `AnalysisReady` with the failure
    /// recorded; the analysis is kept.
    pub async fn compute_risk(
        &self,
        assessment: Assessment,
        clinical: &Value,
    ) -> PipelineResult<Assessment> {
        let (assessment_id, job_id, analysis) = match assessment.state() {
            AssessmentState::AnalysisReady {
                assessment_id,
                job_id,
                analysis,
                ..
            } => (assessment_id.clone(), job_id.clone(), analysis.clone()),
            _ => return Err(wrong_stage(&assessment, "compute_risk")),
        };

        let request = RiskRequest {
            assessment_id: assessment_id.clone(),
            wound_id: assessment.wound_id().clone(),
            analysis,
            clinical: clinical.clone(),
        };
        match self.gateway.get_risk(&request).await {
            Ok(risk) => {
                info!(
                    assessment_id = %assessment_id,
                    infection = %risk.infection.level,
                    prob_heal30 = risk.healing.prob_heal30,
                    "risk computed"
                );
                assessment.advance(AssessmentState::RiskComputed {
                    assessment_id,
                    analysis: request.analysis,
                    risk,
                    sync_failure: None,
                })
            }
            Err(err) => {
                warn!(assessment_id = %assessment_id, error = %err, "risk computation failed, keeping analysis");
                assessment.advance(AssessmentState::AnalysisReady {
                    assessment_id,
                    job_id,
                    analysis: request.analysis,
                    risk_failure: Some(err),
                })
            }
        }
    }

    /// Re-attempt risk for an assessment whose risk step failed.
    pub async fn retry_risk(
        &self,
        assessment: Assessment,
        clinical: &Value,
    ) -> PipelineResult<Assessment> {
        match assessment.degradation() {
            Some((Stage::RiskComputation, _)) => self.compute_risk(assessment, clinical).await,
            _ => Err(wrong_stage(&assessment, "retry_risk")),
        }
    }

    /// `RiskComputed -> Synced`.
    ///
    /// A failed push leaves the assessment `RiskComputed` with the failure
    /// recorded. Calling again retries the push.
    pub async fn sync_fhir(&self, assessment: Assessment) -> PipelineResult<Assessment> {
        let (assessment_id, analysis, risk) = match assessment.state() {
            AssessmentState::RiskComputed {
                assessment_id,
                analysis,
                risk,
                ..
            } => (assessment_id.clone(), analysis.clone(), risk.clone()),
            _ => return Err(wrong_stage(&assessment, "sync_fhir")),
        };

        match self.gateway.fhir_push(&assessment_id).await {
            Ok(sync) => {
                info!(assessment_id = %assessment_id, bundle_id = %sync.bundle_id, "assessment synced to FHIR");
                assessment.advance(AssessmentState::Synced {
                    assessment_id,
                    analysis,
                    risk,
                    sync,
                })
            }
            Err(err) => {
                warn!(assessment_id = %assessment_id, error = %err, "FHIR push failed");
                assessment.advance(AssessmentState::RiskComputed {
                    assessment_id,
                    analysis,
                    risk,
                    sync_failure: Some(err),
                })
            }
        }
    }

    /// Patient context from the FHIR gateway. Independent of any assessment.
    pub async fn fhir_pull(&self, patient_id: &PatientId) -> RemoteResult<FhirPullResult> {
        let result = self.gateway.fhir_pull(patient_id).await;
        match &result {
            Ok(pulled) => {
                debug!(patient_id = %patient_id, resources = pulled.resources.len(), "FHIR pull complete")
            }
            Err(err) => warn!(patient_id = %patient_id, error = %err, "FHIR pull failed"),
        }
        result
    }
}

fn require(
    assessment: &Assessment,
    expected: AssessmentStatus,
    operation: &'static str,
) -> PipelineResult<()> {
    if assessment.status() == expected {
        Ok(())
    } else {
        Err(wrong_stage(assessment, operation))
    }
}

fn wrong_stage(assessment: &Assessment, operation: &'static str) -> PipelineError {
    PipelineError::WrongStage {
        operation,
        status: assessment.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healplus_core::{AssessmentId, WoundId};
    use healplus_test_utils::{fixtures, ScriptedGateway};

    fn orchestrator(gateway: ScriptedGateway) -> AssessmentOrchestrator<ScriptedGateway> {
        AssessmentOrchestrator::new(gateway, PollConfig::default())
    }

    #[tokio::test]
    async fn test_steps_reject_wrong_state() {
        let orch = orchestrator(ScriptedGateway::happy_path("a1"));
        let fresh = Assessment::new(WoundId::from("w1"));

        let err = orch.await_analysis(fresh.clone()).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::WrongStage {
                operation: "await_analysis",
                status: AssessmentStatus::Created,
            }
        );
        assert!(orch.sync_fhir(fresh.clone()).await.is_err());
        assert!(orch.retry_risk(fresh.clone(), &Value::Null).await.is_err());
        assert!(orch
            .retry_analysis(&fresh, &fixtures::submission("w1"), false)
            .await
            .is_err());
        assert_eq!(orch.gateway().analysis_calls(), 0);
    }

    #[tokio::test]
    async fn test_existing_id_skips_creation() {
        let gateway = ScriptedGateway::happy_path("a1");
        let orch = orchestrator(gateway);
        let assessment = Assessment::new(WoundId::from("w1"))
            .advance(AssessmentState::Created {
                assessment_id: Some(AssessmentId::from("a-existing")),
            })
            .unwrap();

        let requested = orch
            .request_analysis(assessment, &fixtures::submission("w1"))
            .await
            .unwrap();
        assert_eq!(requested.status(), AssessmentStatus::AnalysisRequested);
        assert_eq!(requested.assessment_id(), Some(&AssessmentId::from("a-existing")));
        assert_eq!(orch.gateway().create_calls(), 0);
        assert_eq!(
            orch.gateway().vision_requests()[0].assessment_id,
            AssessmentId::from("a-existing")
        );
    }
}
