use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataSyncError {
    #[error("{message} (status {status})")]
    Http { status: u16, message: String },
    #[error("data-sync decode error: {0}")]
    Decode(String),
    #[error("data-sync transport error: {0}")]
    Transport(String),
    #[error("invalid tin: {0:?}")]
    InvalidTin(String),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RelationOutcome {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

/// Typed client for the upstream data-sync service. The caller's bearer
/// token is forwarded on every request.
#[async_trait]
pub trait DataSyncClient: Send + Sync {
    async fn meteringpoints_by_tin(&self, token: &str, tin: &str) -> Result<Vec<String>, DataSyncError>;

    async fn create_relations(
        &self,
        token: &str,
        name_id: &str,
        gsrns: &[String],
    ) -> Result<RelationOutcome, DataSyncError>;
}

#[derive(Clone, Debug)]
pub struct DataSyncConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for DataSyncConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 10_000,
            user_agent: "meteringpoints".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GsrnRef {
    gsrn: String,
}

#[derive(Serialize)]
struct CreateRelationRequest<'a> {
    name_id: &'a str,
    meteringpoint_ids: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationResult {
    meteringpoint_id: String,
    relationship_created: bool,
}

#[derive(Clone)]
pub struct HttpDataSyncClient {
    client: reqwest::Client,
    config: DataSyncConfig,
}

impl HttpDataSyncClient {
    pub fn new(config: DataSyncConfig) -> Result<Self, DataSyncError> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DataSyncError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    /// Appends `segments` to the base URL, each percent-encoded as a single
    /// path segment.
    fn url(&self, segments: &[&str]) -> Result<Url, DataSyncError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|err| DataSyncError::Transport(format!("invalid base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| DataSyncError::Transport("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        let mut request = request.header(AUTHORIZATION, format!("Bearer: {token}"));
        if let Ok(value) = HeaderValue::from_str(&self.config.user_agent) {
            request = request.header(USER_AGENT, value);
        }
        request
    }
}

#[async_trait]
impl DataSyncClient for HttpDataSyncClient {
    async fn meteringpoints_by_tin(&self, token: &str, tin: &str) -> Result<Vec<String>, DataSyncError> {
        if tin.is_empty() || !tin.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DataSyncError::InvalidTin(tin.to_string()));
        }
        let url = self.url(&["MeteringPoint", "GetByTin", tin])?;
        let request = self.client.get(url);
        let response = self
            .authorize(request, token)
            .send()
            .await
            .map_err(|err| DataSyncError::Transport(err.to_string()))?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(DataSyncError::Http {
                    status: 404,
                    message: "User with tin not found.".to_string(),
                })
            }
            status => {
                return Err(DataSyncError::Http {
                    status: status.as_u16(),
                    message: "Failed to fetch meteringpoints by tin.".to_string(),
                })
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| DataSyncError::Transport(err.to_string()))?;
        let refs: Vec<GsrnRef> = serde_json::from_slice(&body)
            .map_err(|err| DataSyncError::Decode(format!("Failed to decode meteringpoints: {err}")))?;
        Ok(refs.into_iter().map(|item| item.gsrn).collect())
    }

    async fn create_relations(
        &self,
        token: &str,
        name_id: &str,
        gsrns: &[String],
    ) -> Result<RelationOutcome, DataSyncError> {
        let request = self
            .client
            .post(self.url(&["MeteringPoint", "createRelation"])?)
            .json(&CreateRelationRequest {
                name_id,
                meteringpoint_ids: gsrns,
            });
        let response = self
            .authorize(request, token)
            .send()
            .await
            .map_err(|err| DataSyncError::Transport(err.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DataSyncError::Http {
                status: status.as_u16(),
                message: "Failed to create meteringpoint relationship.".to_string(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| DataSyncError::Transport(err.to_string()))?;
        let results: Vec<RelationResult> = serde_json::from_slice(&body)
            .map_err(|err| DataSyncError::Decode(format!("Failed to decode response body: {err}")))?;

        let mut outcome = RelationOutcome::default();
        for result in results {
            if result.relationship_created {
                outcome.successful.push(result.meteringpoint_id);
            } else {
                outcome.failed.push(result.meteringpoint_id);
            }
        }
        Ok(outcome)
    }
}
