//! `GatewayClient` against in-process services.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use healplus_core::{
    AssessmentGateway, AssessmentId, JobId, PatientId, RemoteError, RiskRequest, Service,
    VisionRequest, WoundId,
};
use healplus_gateway::{Endpoints, GatewayClient};
use healplus_test_utils::fixtures;
use serde_json::{json, Value};
use std::net::SocketAddr;

async fn create(Path(wound_id): Path<String>, Json(payload): Json<Value>) -> Response {
    if payload.get("woundType").is_none() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({"assessmentId": format!("a-{}", wound_id)})),
    )
        .into_response()
}

async fn analysis(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "a-ready" | "a/ready?" => Json(fixtures::analysis_result()).into_response(),
        "a-garbled" => Json(json!({"segmentationMaskUri": 42})).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn vision(Json(input): Json<VisionRequest>) -> Json<Value> {
    Json(json!({"jobId": format!("job-{}", input.assessment_id)}))
}

async fn risk(Json(input): Json<RiskRequest>) -> Response {
    if input.analysis.tissue_percent("slough").is_none() {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }
    if input.clinical.get("painScore").is_none() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(fixtures::risk_assessment()).into_response()
}

async fn push(Json(body): Json<Value>) -> Response {
    match body.get("assessmentId").and_then(Value::as_str) {
        Some(_) => Json(json!({"bundleId": "bundle-9", "status": "accepted"})).into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn pull(Json(body): Json<Value>) -> Response {
    let expected = json!(["Patient", "Condition", "MedicationRequest"]);
    if body.get("resources") != Some(&expected) || body.get("patientId").is_none() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(fixtures::pull_result()).into_response()
}

async fn serve() -> SocketAddr {
    let router = Router::new()
        .route("/wounds/:wound_id/assessments", post(create))
        .route("/assessments/:id/analysis", get(analysis))
        .route("/analysis/vision", post(vision))
        .route("/analysis/risk", post(risk))
        .route("/fhir/sync/push", post(push))
        .route("/fhir/sync/pull", post(pull));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> GatewayClient {
    let base = format!("http://{}", addr);
    GatewayClient::new(Endpoints::new(&base, &base, &base)).unwrap()
}

#[tokio::test]
async fn test_create_and_vision() {
    let client = client_for(serve().await);
    let submission = fixtures::submission("w1");

    let created = client
        .create_assessment(&submission.wound_id, &submission.payload)
        .await
        .unwrap();
    assert_eq!(created.assessment_id, AssessmentId::from("a-w1"));

    let job = client
        .request_vision_analysis(&VisionRequest {
            assessment_id: created.assessment_id.clone(),
            wound_id: submission.wound_id.clone(),
            image_uri: submission.image_uri.clone(),
        })
        .await
        .unwrap();
    assert_eq!(job.job_id, JobId::from("job-a-w1"));
}

#[tokio::test]
async fn test_reserved_characters_in_ids_stay_in_one_segment() {
    let client = client_for(serve().await);
    let submission = fixtures::submission("w/1?x");

    let created = client
        .create_assessment(&WoundId::from("w/1?x"), &submission.payload)
        .await
        .unwrap();
    assert_eq!(created.assessment_id, AssessmentId::from("a-w/1?x"));

    let ready = client.get_analysis(&AssessmentId::from("a/ready?")).await.unwrap();
    assert_eq!(ready, fixtures::analysis_result());
}

#[tokio::test]
async fn test_analysis_status_and_decode_failures() {
    let client = client_for(serve().await);

    let ready = client.get_analysis(&AssessmentId::from("a-ready")).await.unwrap();
    assert_eq!(ready, fixtures::analysis_result());

    let pending = client.get_analysis(&AssessmentId::from("a-pending")).await.unwrap_err();
    assert_eq!(
        pending,
        RemoteError::rejected(Service::AssessmentStore, 404, "Not Found")
    );
    assert!(pending.is_retryable());

    let garbled = client.get_analysis(&AssessmentId::from("a-garbled")).await.unwrap_err();
    assert!(matches!(
        garbled,
        RemoteError::Decode {
            service: Service::AssessmentStore,
            ..
        }
    ));
}

#[tokio::test]
async fn test_risk_rejection_carries_status() {
    let client = client_for(serve().await);
    let mut input = RiskRequest {
        assessment_id: AssessmentId::from("a-1"),
        wound_id: WoundId::from("w1"),
        analysis: fixtures::analysis_result(),
        clinical: fixtures::submission("w1").payload,
    };
    assert_eq!(client.get_risk(&input).await.unwrap(), fixtures::risk_assessment());

    input.clinical = json!({});
    let err = client.get_risk(&input).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::rejected(Service::AiService, 500, "Internal Server Error")
    );
}

#[tokio::test]
async fn test_fhir_push_and_pull() {
    let client = client_for(serve().await);
    let pushed = client.fhir_push(&AssessmentId::from("a-1")).await.unwrap();
    assert_eq!(pushed.bundle_id, "bundle-9");

    let pulled = client.fhir_pull(&PatientId::from("p1")).await.unwrap();
    assert_eq!(pulled.of_type("Condition").count(), 1);
}

#[tokio::test]
async fn test_unreachable_service_is_transport_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(addr);
    let err = client
        .create_assessment(&WoundId::from("w1"), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RemoteError::Transport {
            service: Service::AssessmentStore,
            ..
        }
    ));
}
