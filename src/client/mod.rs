//! HTTP client for the remote progress service
//!
//! Implements [`ProgressStore`] against the service's REST endpoints so the
//! sync agent and the continuity resolver can run in a client process with
//! no direct database access.

use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    error::{ProgressError, ProgressResult},
    models::{ProgressKey, ProgressRecord, ProgressUpdate, WatchStatistics},
    store::ProgressStore,
};

pub mod beacon;

pub use beacon::{Beacon, HttpBeacon, StoreBeacon};

#[derive(Debug, Deserialize)]
struct ProgressEnvelope {
    progress: Option<ProgressRecord>,
}

#[derive(Debug, Deserialize)]
struct ProgressListEnvelope {
    #[serde(default)]
    progress: Vec<ProgressRecord>,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    history: Vec<ProgressRecord>,
}

#[derive(Debug, Deserialize)]
struct UpdatesEnvelope {
    #[serde(default)]
    updates: Vec<ProgressRecord>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

#[derive(Clone)]
pub struct HttpProgressClient {
    http_client: HttpClient,
    base_url: String,
    session_token: Option<String>,
}

impl HttpProgressClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.into(),
            session_token: None,
        }
    }

    /// Sends the token as a bearer credential on every request
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, self.url(path));
        match &self.session_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn profile_query(identity: &str, profile_id: i32) -> Vec<(&'static str, String)> {
        vec![
            ("userId", identity.to_string()),
            ("profileId", profile_id.to_string()),
        ]
    }

    /// Maps non-success responses onto the error taxonomy, then decodes JSON
    async fn read_json<T: DeserializeOwned>(response: Response) -> ProgressResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        tracing::debug!(status = %status, message = %message, "Progress service request failed");

        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ProgressError::Validation(message)
            }
            StatusCode::NOT_FOUND => ProgressError::NotFound(message),
            _ => ProgressError::Upstream(format!("status {}: {}", status, message)),
        })
    }
}

#[async_trait::async_trait]
impl ProgressStore for HttpProgressClient {
    async fn find_progress(&self, key: &ProgressKey) -> ProgressResult<Option<ProgressRecord>> {
        let response = self
            .request(
                Method::GET,
                &format!("/api/video/progress/{}/{}", key.content_id, key.episode_id),
            )
            .query(&Self::profile_query(&key.identity, key.profile_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: ProgressEnvelope = Self::read_json(response).await?;
        Ok(envelope.progress)
    }

    async fn upsert_progress(&self, update: ProgressUpdate) -> ProgressResult<ProgressRecord> {
        let response = self
            .request(Method::PUT, "/api/video/progress")
            .json(&update)
            .send()
            .await?;

        let envelope: ProgressEnvelope = Self::read_json(response).await?;
        envelope
            .progress
            .ok_or_else(|| ProgressError::Upstream("upsert response carried no record".to_string()))
    }

    async fn mark_completed(&self, key: &ProgressKey) -> ProgressResult<ProgressRecord> {
        let response = self
            .request(Method::POST, "/api/video/mark-completed")
            .json(key)
            .send()
            .await?;

        let envelope: ProgressEnvelope = Self::read_json(response).await?;
        envelope
            .progress
            .ok_or_else(|| ProgressError::NotFound(format!("progress {}", key)))
    }

    async fn list_recent_progress(
        &self,
        identity: &str,
        profile_id: i32,
        limit: usize,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        let mut query = Self::profile_query(identity, profile_id);
        query.push(("limit", limit.to_string()));

        let response = self
            .request(Method::GET, "/api/video/history")
            .query(&query)
            .send()
            .await?;

        let envelope: HistoryEnvelope = Self::read_json(response).await?;
        Ok(envelope.history)
    }

    async fn list_progress_for_content(
        &self,
        identity: &str,
        profile_id: i32,
        content_id: i64,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        let response = self
            .request(
                Method::GET,
                &format!("/api/video/progress/content/{}", content_id),
            )
            .query(&Self::profile_query(identity, profile_id))
            .send()
            .await?;

        let envelope: ProgressListEnvelope = Self::read_json(response).await?;
        Ok(envelope.progress)
    }

    async fn list_updated_since(
        &self,
        identity: &str,
        profile_id: i32,
        since: Option<DateTime<Utc>>,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        let mut query = Self::profile_query(identity, profile_id);
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }

        let response = self
            .request(Method::GET, "/api/video/progress/updates")
            .query(&query)
            .send()
            .await?;

        let envelope: UpdatesEnvelope = Self::read_json(response).await?;
        Ok(envelope.updates)
    }

    async fn watch_statistics(
        &self,
        identity: &str,
        profile_id: i32,
    ) -> ProgressResult<WatchStatistics> {
        let response = self
            .request(Method::GET, "/api/video/statistics")
            .query(&Self::profile_query(identity, profile_id))
            .send()
            .await?;

        Self::read_json(response).await
    }
}
