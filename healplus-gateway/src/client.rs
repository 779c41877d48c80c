//! reqwest implementation of the assessment gateway.

use async_trait::async_trait;
use healplus_core::{
    AnalysisResult, AssessmentGateway, AssessmentId, CreatedAssessment, EndpointConfig,
    FhirPullRequest, FhirPullResult, FhirPushRequest, FhirPushResult, PatientId, RemoteError,
    RemoteResult, RiskAssessment, RiskRequest, Service, VisionJob, VisionRequest, WoundId,
};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Base URLs of the three remote services, without trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub ai_base: String,
    pub fhir_base: String,
}

impl Endpoints {
    pub fn new(api_base: &str, ai_base: &str, fhir_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ai_base: ai_base.trim_end_matches('/').to_string(),
            fhir_base: fhir_base.trim_end_matches('/').to_string(),
        }
    }
}

impl From<&EndpointConfig> for Endpoints {
    fn from(config: &EndpointConfig) -> Self {
        Self::new(&config.api_base, &config.ai_base, config.fhir_base())
    }
}

/// Client for the assessment backend, AI service and FHIR gateway.
///
/// No request timeout is configured. The orchestrator abandons an analysis
/// poll still in flight at its deadline; other calls wait for the service.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl GatewayClient {
    pub fn new(endpoints: Endpoints) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RemoteError::transport(Service::AssessmentStore, e.to_string()))?;
        Ok(Self { client, endpoints })
    }

    pub fn from_config(config: &EndpointConfig) -> RemoteResult<Self> {
        Self::new(Endpoints::from(config))
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn get_json<T>(&self, service: Service, url: Url) -> RemoteResult<T>
    where
        T: DeserializeOwned,
    {
        let request = self.client.get(url.clone());
        self.execute(service, "GET", url, request).await
    }

    async fn post_json<T, B>(&self, service: Service, url: Url, body: &B) -> RemoteResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.client.post(url.clone()).json(body);
        self.execute(service, "POST", url, request).await
    }

    async fn execute<T>(
        &self,
        service: Service,
        method: &'static str,
        url: Url,
        request: reqwest::RequestBuilder,
    ) -> RemoteResult<T>
    where
        T: DeserializeOwned,
    {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(%service, method, url = %url, error = %err, "request failed before a response");
                return Err(RemoteError::transport(service, err.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            warn!(%service, method, url = %url, status = status.as_u16(), reason, "request rejected");
            return Err(RemoteError::rejected(service, status.as_u16(), reason));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| RemoteError::transport(service, err.to_string()))?;
        match serde_json::from_slice(&body) {
            Ok(parsed) => {
                debug!(%service, method, url = %url, status = status.as_u16(), "request succeeded");
                Ok(parsed)
            }
            Err(err) => {
                warn!(%service, method, url = %url, error = %err, "response body not understood");
                Err(RemoteError::decode(service, err.to_string()))
            }
        }
    }
}

/// `base` followed by `segments`, each percent-encoded as one path segment.
fn endpoint_url(service: Service, base: &str, segments: &[&str]) -> RemoteResult<Url> {
    let mut url = Url::parse(base).map_err(|err| {
        RemoteError::transport(service, format!("invalid base URL {}: {}", base, err))
    })?;
    url.path_segments_mut()
        .map_err(|()| RemoteError::transport(service, format!("base URL {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl AssessmentGateway for GatewayClient {
    async fn create_assessment(
        &self,
        wound_id: &WoundId,
        payload: &Value,
    ) -> RemoteResult<CreatedAssessment> {
        let service = Service::AssessmentStore;
        let url = endpoint_url(
            service,
            &self.endpoints.api_base,
            &["wounds", wound_id.as_str(), "assessments"],
        )?;
        self.post_json(service, url, payload).await
    }

    async fn get_analysis(&self, assessment_id: &AssessmentId) -> RemoteResult<AnalysisResult> {
        let service = Service::AssessmentStore;
        let url = endpoint_url(
            service,
            &self.endpoints.api_base,
            &["assessments", assessment_id.as_str(), "analysis"],
        )?;
        self.get_json(service, url).await
    }

    async fn request_vision_analysis(&self, input: &VisionRequest) -> RemoteResult<VisionJob> {
        let service = Service::AiService;
        let url = endpoint_url(service, &self.endpoints.ai_base, &["analysis", "vision"])?;
        self.post_json(service, url, input).await
    }

    async fn get_risk(&self, input: &RiskRequest) -> RemoteResult<RiskAssessment> {
        let service = Service::AiService;
        let url = endpoint_url(service, &self.endpoints.ai_base, &["analysis", "risk"])?;
        self.post_json(service, url, input).await
    }

    async fn fhir_push(&self, assessment_id: &AssessmentId) -> RemoteResult<FhirPushResult> {
        let service = Service::FhirGateway;
        let url = endpoint_url(service, &self.endpoints.fhir_base, &["fhir", "sync", "push"])?;
        let body = FhirPushRequest {
            assessment_id: assessment_id.clone(),
        };
        self.post_json(service, url, &body).await
    }

    async fn fhir_pull(&self, patient_id: &PatientId) -> RemoteResult<FhirPullResult> {
        let service = Service::FhirGateway;
        let url = endpoint_url(service, &self.endpoints.fhir_base, &["fhir", "sync", "pull"])?;
        let body = FhirPullRequest::for_patient(patient_id.clone());
        self.post_json(service, url, &body).await
    }
}
