//! HTTP client for the mapping backend
//!
//! Endpoints (relative to the configured base URL):
//! - `POST /sessions/{id}/map` start a mapping job
//! - `GET  /sessions/{id}/map/status` poll the job
//! - `GET  /sessions/{id}/mapping` load the saved mapping (404 → none)
//! - `PUT  /sessions/{id}/mapping` save the mapping
//! - `POST /sessions/{id}/export` export the mapping

use std::time::Duration;

use async_trait::async_trait;
use canmap_common::config::CanmapConfig;
use canmap_common::CanonicalMapping;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{BackendError, ExportResponse, JobStatusResponse, MappingBackend};

const USER_AGENT: &str = concat!("canmap/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed [`MappingBackend`]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url =
            Url::parse(base_url).map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn from_config(config: &CanmapConfig) -> Result<Self, BackendError> {
        Self::new(&config.backend_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/sessions/{session_id}/{tail...}` with each segment percent-encoded
    fn endpoint(&self, session_id: &str, tail: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("sessions")
            .push(session_id)
            .extend(tail);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Parse(e.to_string()))
    }
}

/// Human-readable message from an error body.
///
/// Understands `{"detail": ...}` and `{"error": {"message": ...}}`; falls back
/// to the raw body, then to the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        match json.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(detail) if !detail.is_null() => return detail.to_string(),
            _ => {}
        }
        if let Some(message) = json.pointer("/error/message").and_then(Value::as_str) {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    status
        .canonical_reason()
        .unwrap_or("Unknown error")
        .to_string()
}

#[async_trait]
impl MappingBackend for HttpBackend {
    async fn start_job(&self, session_id: &str) -> Result<JobStatusResponse, BackendError> {
        let url = self.endpoint(session_id, &["map"])?;
        tracing::debug!(session_id = %session_id, url = %url, "Starting mapping job");
        let response = self.send(self.http_client.post(url)).await?;
        Self::decode(response).await
    }

    async fn job_status(&self, session_id: &str) -> Result<JobStatusResponse, BackendError> {
        let url = self.endpoint(session_id, &["map", "status"])?;
        let response = self.send(self.http_client.get(url)).await?;
        Self::decode(response).await
    }

    async fn load_mapping(&self, session_id: &str) -> Result<Option<CanonicalMapping>, BackendError> {
        let url = self.endpoint(session_id, &["mapping"])?;
        match self.send(self.http_client.get(url)).await {
            Ok(response) => Self::decode(response).await.map(Some),
            Err(BackendError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save_mapping(
        &self,
        session_id: &str,
        mapping: &CanonicalMapping,
    ) -> Result<CanonicalMapping, BackendError> {
        let url = self.endpoint(session_id, &["mapping"])?;
        tracing::debug!(session_id = %session_id, tables = mapping.mapped.len(), "Saving mapping");
        let response = self.send(self.http_client.put(url).json(mapping)).await?;
        Self::decode(response).await
    }

    async fn export(&self, session_id: &str) -> Result<ExportResponse, BackendError> {
        let url = self.endpoint(session_id, &["export"])?;
        let response = self.send(self.http_client.post(url)).await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let url = backend("http://localhost:8000/api/").endpoint("abc", &["map", "status"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/sessions/abc/map/status");
    }

    #[test]
    fn test_endpoint_encodes_session_id() {
        let url = backend("http://localhost:8000").endpoint("a b/c", &["mapping"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/sessions/a%20b%2Fc/mapping");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HttpBackend::new("not a url", Duration::from_secs(1)),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, r#"{"detail": "Session not found"}"#),
            "Session not found"
        );
        assert_eq!(
            error_message(
                StatusCode::CONFLICT,
                r#"{"error": {"code": "CONFLICT", "message": "Job already running"}}"#
            ),
            "Job already running"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
    }
}
