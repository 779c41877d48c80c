//! HealPlus Test Utilities
//!
//! Shared test infrastructure for the HealPlus workspace:
//! - Mock gateway, store wrapper and clock
//! - Proptest generators for records and remote failures
//! - Fixtures for clinical payloads
//! - Assertions for ordering and pipeline status

pub use healplus_core::{
    AnalysisResult, Assessment, AssessmentGateway, AssessmentId, AssessmentStatus,
    AssessmentSubmission, Clock, CollectionRecord, CreatedAssessment, FhirPullResult,
    FhirPushResult, HealingOutlook, InfectionRisk, JobId, Measurement, PatientId, RemoteError,
    RemoteResult, RiskAssessment, RiskRequest, Service, TissueQuant, Timestamp, VisionJob,
    VisionRequest, WoundId,
};
pub use healplus_storage::{DocumentStore, InMemoryDocumentStore, RemoteDocument, StoreError};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCKS
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// A clock starting at [`fixtures::epoch`].
    pub fn at_epoch() -> Arc<Self> {
        Self::new(fixtures::epoch())
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = lock(&self.now);
        *now = now.checked_add_signed(step).unwrap_or(*now);
    }

    pub fn set(&self, to: Timestamp) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *lock(&self.now)
    }
}

/// Per-operation queue of canned responses.
///
/// Each call pops the next response. An empty queue repeats the last
/// response popped, or fails with a transport error if there was none.
#[derive(Debug)]
struct Script<T> {
    queue: Mutex<VecDeque<RemoteResult<T>>>,
    last: Mutex<Option<RemoteResult<T>>>,
    calls: AtomicUsize,
    service: Service,
}

impl<T: Clone> Script<T> {
    fn new(service: Service) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            service,
        }
    }

    fn push(&self, response: RemoteResult<T>) {
        lock(&self.queue).push_back(response);
    }

    fn next(&self, operation: &str) -> RemoteResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let popped = lock(&self.queue).pop_front();
        match popped {
            Some(response) => {
                *lock(&self.last) = Some(response.clone());
                response
            }
            None => lock(&self.last).clone().unwrap_or_else(|| {
                Err(RemoteError::transport(
                    self.service,
                    format!("no scripted response for {}", operation),
                ))
            }),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn is_drained(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`AssessmentGateway`] answering from scripted queues and recording calls.
#[derive(Debug)]
pub struct ScriptedGateway {
    create: Script<CreatedAssessment>,
    analysis: Script<AnalysisResult>,
    vision: Script<VisionJob>,
    risk: Script<RiskAssessment>,
    push: Script<FhirPushResult>,
    pull: Script<FhirPullResult>,
    vision_requests: Mutex<Vec<VisionRequest>>,
    risk_requests: Mutex<Vec<RiskRequest>>,
    analysis_hangs: AtomicBool,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            create: Script::new(Service::AssessmentStore),
            analysis: Script::new(Service::AssessmentStore),
            vision: Script::new(Service::AiService),
            risk: Script::new(Service::AiService),
            push: Script::new(Service::FhirGateway),
            pull: Script::new(Service::FhirGateway),
            vision_requests: Mutex::new(Vec::new()),
            risk_requests: Mutex::new(Vec::new()),
            analysis_hangs: AtomicBool::new(false),
        }
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every step succeeds with the standard fixtures.
    pub fn happy_path(assessment_id: &str) -> Self {
        let gateway = Self::new();
        gateway.on_create(Ok(CreatedAssessment {
            assessment_id: AssessmentId::from(assessment_id),
        }));
        gateway.on_vision(Ok(VisionJob {
            job_id: JobId::from("job-1"),
        }));
        gateway.on_analysis(Ok(fixtures::analysis_result()));
        gateway.on_risk(Ok(fixtures::risk_assessment()));
        gateway.on_push(Ok(fixtures::push_result()));
        gateway.on_pull(Ok(fixtures::pull_result()));
        gateway
    }

    pub fn on_create(&self, response: RemoteResult<CreatedAssessment>) -> &Self {
        self.create.push(response);
        self
    }

    pub fn on_analysis(&self, response: RemoteResult<AnalysisResult>) -> &Self {
        self.analysis.push(response);
        self
    }

    /// Once the queued analysis responses are used up, every further
    /// `get_analysis` call never completes.
    pub fn hang_analysis(&self) -> &Self {
        self.analysis_hangs.store(true, Ordering::SeqCst);
        self
    }

    pub fn on_vision(&self, response: RemoteResult<VisionJob>) -> &Self {
        self.vision.push(response);
        self
    }

    pub fn on_risk(&self, response: RemoteResult<RiskAssessment>) -> &Self {
        self.risk.push(response);
        self
    }

    pub fn on_push(&self, response: RemoteResult<FhirPushResult>) -> &Self {
        self.push.push(response);
        self
    }

    pub fn on_pull(&self, response: RemoteResult<FhirPullResult>) -> &Self {
        self.pull.push(response);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create.calls()
    }

    pub fn analysis_calls(&self) -> usize {
        self.analysis.calls()
    }

    pub fn vision_calls(&self) -> usize {
        self.vision.calls()
    }

    pub fn risk_calls(&self) -> usize {
        self.risk.calls()
    }

    pub fn push_calls(&self) -> usize {
        self.push.calls()
    }

    pub fn pull_calls(&self) -> usize {
        self.pull.calls()
    }

    pub fn vision_requests(&self) -> Vec<VisionRequest> {
        lock(&self.vision_requests).clone()
    }

    pub fn risk_requests(&self) -> Vec<RiskRequest> {
        lock(&self.risk_requests).clone()
    }
}

#[async_trait]
impl AssessmentGateway for ScriptedGateway {
    async fn create_assessment(
        &self,
        _wound_id: &WoundId,
        _payload: &Value,
    ) -> RemoteResult<CreatedAssessment> {
        self.create.next("create_assessment")
    }

    async fn get_analysis(&self, _assessment_id: &AssessmentId) -> RemoteResult<AnalysisResult> {
        if self.analysis_hangs.load(Ordering::SeqCst) && self.analysis.is_drained() {
            self.analysis.record_call();
            return std::future::pending().await;
        }
        self.analysis.next("get_analysis")
    }

    async fn request_vision_analysis(&self, input: &VisionRequest) -> RemoteResult<VisionJob> {
        lock(&self.vision_requests).push(input.clone());
        self.vision.next("request_vision_analysis")
    }

    async fn get_risk(&self, input: &RiskRequest) -> RemoteResult<RiskAssessment> {
        lock(&self.risk_requests).push(input.clone());
        self.risk.next("get_risk")
    }

    async fn fhir_push(&self, _assessment_id: &AssessmentId) -> RemoteResult<FhirPushResult> {
        self.push.next("fhir_push")
    }

    async fn fhir_pull(&self, _patient_id: &PatientId) -> RemoteResult<FhirPullResult> {
        self.pull.next("fhir_pull")
    }
}

/// Wraps a [`DocumentStore`], counting queries and injecting query failures.
pub struct CountingStore {
    inner: Arc<dyn DocumentStore>,
    queries: AtomicUsize,
    failures: Mutex<VecDeque<StoreError>>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            queries: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Fail the next query with `error`. Queued failures are used in order.
    pub fn fail_next_query(&self, error: StoreError) {
        lock(&self.failures).push_back(error);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn query_newest_first(&self, path: &str) -> Result<Vec<RemoteDocument>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failure = lock(&self.failures).pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        self.inner.query_newest_first(path).await
    }

    async fn get_document(&self, path: &str, id: &str) -> Result<Option<RemoteDocument>, StoreError> {
        self.inner.get_document(path, id).await
    }

    async fn append(&self, path: &str, fields: Map<String, Value>) -> Result<String, StoreError> {
        self.inner.append(path, fields).await
    }

    async fn watch_newest_first(&self, path: &str) -> Result<healplus_storage::SnapshotStream, StoreError> {
        self.inner.watch_newest_first(path).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for HealPlus types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp (DateTime<Utc>) between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a small flat JSON payload.
    pub fn arb_fields() -> impl Strategy<Value = Map<String, Value>> {
        proptest::collection::btree_map(
            "[a-z]{1,8}",
            prop_oneof![
                any::<bool>().prop_map(Value::from),
                any::<i32>().prop_map(Value::from),
                "[a-zA-Z ]{0,12}".prop_map(Value::from),
            ],
            0..4,
        )
        .prop_map(|fields| fields.into_iter().filter(|(k, _)| k != "id").collect())
    }

    /// Generate a record with a random id and creation time.
    pub fn arb_record() -> impl Strategy<Value = CollectionRecord> {
        ("[a-z0-9]{4,10}", arb_timestamp(), arb_fields())
            .prop_map(|(id, created_at, fields)| CollectionRecord::new(id, created_at, fields))
    }

    /// Generate records with unique ids, in arbitrary order.
    pub fn arb_records(max: usize) -> impl Strategy<Value = Vec<CollectionRecord>> {
        proptest::collection::vec(arb_record(), 0..max).prop_map(|records| {
            let mut seen = std::collections::HashSet::new();
            records
                .into_iter()
                .filter(|r| seen.insert(r.id.clone()))
                .collect()
        })
    }

    pub fn arb_service() -> impl Strategy<Value = Service> {
        prop_oneof![
            Just(Service::AssessmentStore),
            Just(Service::AiService),
            Just(Service::FhirGateway),
            Just(Service::DocumentStore),
        ]
    }

    /// Generate any remote failure.
    pub fn arb_remote_error() -> impl Strategy<Value = RemoteError> {
        (arb_service(), 0u8..3, 400u16..600, "[a-z ]{1,16}").prop_map(
            |(service, kind, status, reason)| match kind {
                0 => RemoteError::transport(service, reason),
                1 => RemoteError::rejected(service, status, reason),
                _ => RemoteError::decode(service, reason),
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads for common scenarios.

    use super::*;
    use serde_json::json;

    /// Fixed start time for deterministic clocks.
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture fields must be a JSON object, got {}", other),
        }
    }

    pub fn record(id: &str, created_at: Timestamp) -> CollectionRecord {
        CollectionRecord::new(id, created_at, Map::new())
    }

    pub fn submission(wound_id: &str) -> AssessmentSubmission {
        AssessmentSubmission {
            wound_id: WoundId::from(wound_id),
            image_uri: format!("gs://healplus-wounds/{}/capture.jpg", wound_id),
            payload: json!({
                "woundType": "venous_ulcer",
                "location": "left_lower_leg",
                "exudate": "moderate",
                "painScore": 4,
            }),
        }
    }

    pub fn analysis_result() -> AnalysisResult {
        AnalysisResult {
            segmentation_mask_uri: "gs://healplus-masks/mask-1.png".to_string(),
            tissue_quant: vec![
                TissueQuant {
                    class: "granulation".to_string(),
                    percent: 60.0,
                },
                TissueQuant {
                    class: "slough".to_string(),
                    percent: 30.0,
                },
                TissueQuant {
                    class: "necrotic".to_string(),
                    percent: 10.0,
                },
            ],
            area: Measurement::new(12.5, "cm2"),
            perimeter: Measurement::new(14.2, "cm"),
            gradcam_uri: Some("gs://healplus-masks/gradcam-1.png".to_string()),
        }
    }

    pub fn risk_assessment() -> RiskAssessment {
        RiskAssessment {
            infection: InfectionRisk {
                level: "moderate".to_string(),
                score: 0.42,
                factors: vec!["slough > 25%".to_string()],
            },
            healing: HealingOutlook {
                prob_heal30: 0.55,
                time_to_heal: 38.0,
                stagnation: false,
                factors: vec![],
            },
        }
    }

    pub fn push_result() -> FhirPushResult {
        FhirPushResult {
            bundle_id: "bundle-1".to_string(),
            status: "accepted".to_string(),
        }
    }

    pub fn pull_result() -> FhirPullResult {
        FhirPullResult {
            resources: vec![
                json!({"resourceType": "Patient", "id": "p1"}),
                json!({"resourceType": "Condition", "id": "c1", "code": {"text": "Venous ulcer"}}),
                json!({"resourceType": "MedicationRequest", "id": "m1"}),
            ],
        }
    }

    pub fn unavailable(service: Service) -> RemoteError {
        RemoteError::rejected(service, 503, "Service Unavailable")
    }

    pub fn not_ready() -> RemoteError {
        RemoteError::rejected(Service::AssessmentStore, 404, "Not Found")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for HealPlus-specific invariants.

    use super::*;

    /// Assert records are ordered by creation time, newest first.
    #[track_caller]
    pub fn assert_newest_first(records: &[CollectionRecord]) {
        for pair in records.windows(2) {
            assert!(
                pair[0].created_at >= pair[1].created_at,
                "{} ({}) listed before newer {} ({})",
                pair[0].id,
                pair[0].created_at,
                pair[1].id,
                pair[1].created_at
            );
        }
    }

    #[track_caller]
    pub fn assert_status(assessment: &Assessment, expected: AssessmentStatus) {
        assert_eq!(
            assessment.status(),
            expected,
            "unexpected state: {}",
            assessment.describe()
        );
    }
}
