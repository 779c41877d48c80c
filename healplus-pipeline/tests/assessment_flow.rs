//! End-to-end orchestrator behavior against a scripted gateway.

use healplus_core::{
    AssessmentId, AssessmentStatus, CreatedAssessment, JobId, PatientId, PipelineError,
    PollConfig, RemoteError, Service, Stage, VisionJob,
};
use healplus_pipeline::AssessmentOrchestrator;
use healplus_test_utils::assertions::assert_status;
use healplus_test_utils::{fixtures, generators, ScriptedGateway};
use proptest::prelude::*;
use std::time::Duration;

fn orchestrator(gateway: ScriptedGateway) -> AssessmentOrchestrator<ScriptedGateway> {
    AssessmentOrchestrator::new(gateway, PollConfig::default())
}

/// Creation and the vision request succeed; later steps are up to the test.
fn through_vision(assessment_id: &str) -> ScriptedGateway {
    let gateway = ScriptedGateway::new();
    gateway
        .on_create(Ok(CreatedAssessment {
            assessment_id: AssessmentId::from(assessment_id),
        }))
        .on_vision(Ok(VisionJob {
            job_id: JobId::from("job-1"),
        }));
    gateway
}

#[tokio::test]
async fn test_happy_path_reaches_risk_computed() {
    let orch = orchestrator(ScriptedGateway::happy_path("a-1"));
    let submission = fixtures::submission("w1");

    let assessment = orch.run(&submission, false).await.unwrap();

    assert_status(&assessment, AssessmentStatus::RiskComputed);
    assert_eq!(assessment.assessment_id(), Some(&AssessmentId::from("a-1")));
    assert_eq!(assessment.analysis(), Some(&fixtures::analysis_result()));
    assert_eq!(assessment.risk(), Some(&fixtures::risk_assessment()));
    assert!(!assessment.is_degraded());
    assert_eq!(orch.gateway().push_calls(), 0);

    let risk_request = &orch.gateway().risk_requests()[0];
    assert_eq!(risk_request.analysis, fixtures::analysis_result());
    assert_eq!(risk_request.clinical, submission.payload);
    assert_eq!(orch.gateway().vision_requests()[0].image_uri, submission.image_uri);
}

#[tokio::test]
async fn test_happy_path_with_sync() {
    let orch = orchestrator(ScriptedGateway::happy_path("a-1"));
    let assessment = orch.run(&fixtures::submission("w1"), true).await.unwrap();

    assert_status(&assessment, AssessmentStatus::Synced);
    assert_eq!(assessment.sync_result(), Some(&fixtures::push_result()));
    assert!(assessment.risk().is_some());
}

#[tokio::test]
async fn test_risk_rejection_keeps_analysis() {
    let failure = RemoteError::rejected(Service::AiService, 500, "Internal Server Error");
    let gateway = through_vision("a-1");
    gateway
        .on_analysis(Ok(fixtures::analysis_result()))
        .on_risk(Err(failure.clone()));
    let orch = orchestrator(gateway);

    let assessment = orch.run(&fixtures::submission("w1"), true).await.unwrap();

    assert_status(&assessment, AssessmentStatus::AnalysisReady);
    assert_eq!(assessment.analysis(), Some(&fixtures::analysis_result()));
    assert_eq!(assessment.risk(), None);
    assert_eq!(
        assessment.degradation(),
        Some((Stage::RiskComputation, &failure))
    );
    // No push without risk.
    assert_eq!(orch.gateway().push_calls(), 0);
}

#[tokio::test]
async fn test_retry_risk_after_degradation() {
    let gateway = through_vision("a-1");
    gateway
        .on_analysis(Ok(fixtures::analysis_result()))
        .on_risk(Err(fixtures::unavailable(Service::AiService)))
        .on_risk(Ok(fixtures::risk_assessment()));
    let orch = orchestrator(gateway);
    let submission = fixtures::submission("w1");

    let degraded = orch.run(&submission, false).await.unwrap();
    assert!(degraded.is_degraded());

    let recovered = orch.retry_risk(degraded, &submission.payload).await.unwrap();
    assert_status(&recovered, AssessmentStatus::RiskComputed);
    assert_eq!(orch.gateway().risk_calls(), 2);

    // Nothing left to retry.
    assert!(orch.retry_risk(recovered, &submission.payload).await.is_err());
}

#[tokio::test]
async fn test_create_transport_failure_has_no_id() {
    let gateway = ScriptedGateway::new();
    let failure = RemoteError::transport(Service::AssessmentStore, "connection refused");
    gateway.on_create(Err(failure.clone()));
    let orch = orchestrator(gateway);

    let assessment = orch.run(&fixtures::submission("w1"), false).await.unwrap();

    assert_status(&assessment, AssessmentStatus::Failed);
    assert_eq!(assessment.assessment_id(), None);
    assert_eq!(
        assessment.failure(),
        Some((Stage::CreateAssessment, &PipelineError::Remote(failure)))
    );
    assert_eq!(orch.gateway().vision_calls(), 0);
    assert_eq!(orch.gateway().create_calls(), 1);
}

#[tokio::test]
async fn test_vision_failure_keeps_id_and_retry_reuses_it() {
    let gateway = ScriptedGateway::new();
    gateway
        .on_create(Ok(CreatedAssessment {
            assessment_id: AssessmentId::from("a-7"),
        }))
        .on_vision(Err(fixtures::unavailable(Service::AiService)))
        .on_vision(Ok(VisionJob {
            job_id: JobId::from("job-2"),
        }))
        .on_analysis(Ok(fixtures::analysis_result()))
        .on_risk(Ok(fixtures::risk_assessment()));
    let orch = orchestrator(gateway);
    let submission = fixtures::submission("w7");

    let failed = orch.run(&submission, false).await.unwrap();
    assert_status(&failed, AssessmentStatus::Failed);
    assert_eq!(failed.assessment_id(), Some(&AssessmentId::from("a-7")));
    assert_eq!(failed.failure().map(|(stage, _)| stage), Some(Stage::VisionRequest));

    let retried = orch.retry_analysis(&failed, &submission, false).await.unwrap();
    assert_status(&retried, AssessmentStatus::RiskComputed);
    assert_eq!(retried.assessment_id(), Some(&AssessmentId::from("a-7")));
    assert_ne!(retried.attempt(), failed.attempt());
    // The backend assessment was not created twice.
    assert_eq!(orch.gateway().create_calls(), 1);
    assert_eq!(orch.gateway().vision_calls(), 2);
}

#[tokio::test]
async fn test_retry_analysis_needs_an_id() {
    let gateway = ScriptedGateway::new();
    gateway.on_create(Err(fixtures::unavailable(Service::AssessmentStore)));
    let orch = orchestrator(gateway);
    let submission = fixtures::submission("w1");

    let failed = orch.run(&submission, false).await.unwrap();
    let err = orch.retry_analysis(&failed, &submission, false).await.unwrap_err();
    assert!(matches!(err, PipelineError::WrongStage { operation: "retry_analysis", .. }));
}

#[tokio::test]
async fn test_push_failure_stays_risk_computed() {
    let failure = fixtures::unavailable(Service::FhirGateway);
    let gateway = through_vision("a-1");
    gateway
        .on_analysis(Ok(fixtures::analysis_result()))
        .on_risk(Ok(fixtures::risk_assessment()))
        .on_push(Err(failure.clone()))
        .on_push(Ok(fixtures::push_result()));
    let orch = orchestrator(gateway);

    let assessment = orch.run(&fixtures::submission("w1"), true).await.unwrap();
    assert_status(&assessment, AssessmentStatus::RiskComputed);
    assert_eq!(assessment.risk(), Some(&fixtures::risk_assessment()));
    assert_eq!(assessment.degradation(), Some((Stage::FhirPush, &failure)));
    assert_eq!(orch.gateway().push_calls(), 1);

    // The caller decides to push again.
    let synced = orch.sync_fhir(assessment).await.unwrap();
    assert_status(&synced, AssessmentStatus::Synced);
    assert!(!synced.is_degraded());
}

#[tokio::test(start_paused = true)]
async fn test_analysis_poll_until_ready() {
    let gateway = through_vision("a-1");
    gateway
        .on_analysis(Err(fixtures::not_ready()))
        .on_analysis(Err(RemoteError::transport(Service::AssessmentStore, "reset")))
        .on_analysis(Ok(fixtures::analysis_result()))
        .on_risk(Ok(fixtures::risk_assessment()));
    let orch = orchestrator(gateway);

    let started = tokio::time::Instant::now();
    let assessment = orch.run(&fixtures::submission("w1"), false).await.unwrap();

    assert_status(&assessment, AssessmentStatus::RiskComputed);
    assert_eq!(orch.gateway().analysis_calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(4_000));
}

#[tokio::test(start_paused = true)]
async fn test_analysis_timeout_fails_assessment() {
    let gateway = through_vision("a-1");
    gateway
        // Repeated for every poll.
        .on_analysis(Err(fixtures::not_ready()));
    let orch = AssessmentOrchestrator::new(
        gateway,
        PollConfig {
            interval_ms: 1_000,
            max_wait_ms: 5_000,
        },
    );

    let assessment = orch.run(&fixtures::submission("w1"), false).await.unwrap();

    assert_status(&assessment, AssessmentStatus::Failed);
    assert_eq!(assessment.assessment_id(), Some(&AssessmentId::from("a-1")));
    match assessment.failure() {
        Some((
            Stage::AnalysisWait,
            PipelineError::AnalysisTimeout {
                attempts,
                waited,
                last_error,
                ..
            },
        )) => {
            assert_eq!(*attempts, 6);
            assert_eq!(*waited, Duration::from_secs(5));
            assert_eq!(last_error.as_ref(), Some(&fixtures::not_ready()));
        }
        other => panic!("expected analysis timeout, got {:?}", other),
    }
    assert_eq!(orch.gateway().risk_calls(), 0);
}

fn expect_timeout(assessment: &healplus_core::Assessment) -> (u32, Duration, Option<RemoteError>) {
    match assessment.failure() {
        Some((
            Stage::AnalysisWait,
            PipelineError::AnalysisTimeout {
                attempts,
                waited,
                last_error,
                ..
            },
        )) => (*attempts, *waited, last_error.clone()),
        other => panic!("expected analysis timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_poll_times_out_at_max_wait() {
    let gateway = through_vision("a-1");
    gateway.hang_analysis();
    let orch = AssessmentOrchestrator::new(
        gateway,
        PollConfig {
            interval_ms: 1_000,
            max_wait_ms: 5_000,
        },
    );

    let assessment = tokio::time::timeout(
        Duration::from_secs(3_600),
        orch.run(&fixtures::submission("w1"), false),
    )
    .await
    .expect("analysis wait not bounded by max_wait")
    .unwrap();

    assert_status(&assessment, AssessmentStatus::Failed);
    assert_eq!(assessment.assessment_id(), Some(&AssessmentId::from("a-1")));
    assert_eq!(expect_timeout(&assessment), (1, Duration::from_secs(5), None));
    assert_eq!(orch.gateway().risk_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_hanging_after_not_ready_keeps_last_error() {
    let gateway = through_vision("a-1");
    gateway
        .on_analysis(Err(fixtures::not_ready()))
        .hang_analysis();
    let orch = AssessmentOrchestrator::new(
        gateway,
        PollConfig {
            interval_ms: 1_000,
            max_wait_ms: 5_000,
        },
    );

    let assessment = tokio::time::timeout(
        Duration::from_secs(3_600),
        orch.run(&fixtures::submission("w1"), false),
    )
    .await
    .expect("analysis wait not bounded by max_wait")
    .unwrap();

    assert_eq!(
        expect_timeout(&assessment),
        (2, Duration::from_secs(5), Some(fixtures::not_ready()))
    );
    assert_eq!(orch.gateway().analysis_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_poll_failure_fails_immediately() {
    let failure = RemoteError::decode(Service::AssessmentStore, "expected value at line 1");
    let gateway = through_vision("a-1");
    gateway
        .on_analysis(Err(failure.clone()));
    let orch = orchestrator(gateway);

    let started = tokio::time::Instant::now();
    let assessment = orch.run(&fixtures::submission("w1"), false).await.unwrap();

    assert_eq!(
        assessment.failure(),
        Some((Stage::AnalysisWait, &PipelineError::Remote(failure)))
    );
    assert_eq!(orch.gateway().analysis_calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_fhir_pull_is_independent() {
    let orch = orchestrator(ScriptedGateway::happy_path("a-1"));
    let pulled = orch.fhir_pull(&PatientId::from("p1")).await.unwrap();
    assert_eq!(pulled.of_type("Patient").count(), 1);
    assert_eq!(orch.gateway().create_calls(), 0);
}

#[tokio::test]
async fn test_assessment_serializes_with_status_tag() {
    let orch = orchestrator(ScriptedGateway::happy_path("a-1"));
    let assessment = orch.run(&fixtures::submission("w1"), false).await.unwrap();
    let json = serde_json::to_value(&assessment).unwrap();
    assert_eq!(json["state"]["status"], "risk_computed");
    assert_eq!(json["state"]["assessmentId"], "a-1");
    assert!(json["state"].get("assessment_id").is_none());
    assert!(json["state"]["analysis"]["tissueQuant"].is_array());
    assert!(json["state"]["syncFailure"].is_null());
    assert_eq!(json["woundId"], "w1");
}

proptest! {
    #[test]
    fn prop_create_failure_never_reaches_vision(failure in generators::arb_remote_error()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        let gateway = ScriptedGateway::new();
        gateway.on_create(Err(failure.clone()));
        let orch = orchestrator(gateway);

        let assessment = rt.block_on(orch.run(&fixtures::submission("w1"), false)).unwrap();
        prop_assert_eq!(assessment.status(), AssessmentStatus::Failed);
        prop_assert!(assessment.assessment_id().is_none());
        prop_assert_eq!(orch.gateway().vision_calls(), 0);
        prop_assert_eq!(
            assessment.failure(),
            Some((Stage::CreateAssessment, &PipelineError::Remote(failure)))
        );
    }
}
