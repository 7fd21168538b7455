//! API client for the demo backend.

use std::time::Duration;

use reqwest::{header, Client};
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::AuthResult;
use crate::config::UnauthenticatedPolicy;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    policy: UnauthenticatedPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, policy: UnauthenticatedPolicy) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(session: Option<&AuthResult>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(session) = session {
            let value = header::HeaderValue::from_str(&session.authorization()).map_err(|_| {
                ApiError::InvalidResponse("Stored token is not a valid header value".to_string())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// `GET <base-url>/` with the session's credentials.
    ///
    /// Without a session the request is either refused here or sent bare,
    /// depending on the configured policy. Nothing is retried.
    pub async fn call_api(&self, session: Option<&AuthResult>) -> Result<Value, ApiError> {
        if session.is_none() {
            match self.policy {
                UnauthenticatedPolicy::Reject => return Err(ApiError::NotAuthenticated),
                UnauthenticatedPolicy::Attempt => {
                    warn!("Calling API without a session");
                }
            }
        }

        let url = format!("{}/", self.base_url);
        debug!(url = %url, "Calling API");

        let response = self
            .client
            .get(&url)
            .headers(Self::auth_headers(session)?)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Body is not JSON: {}", e)))
    }

    /// Pretty-print a response the way it is shown to the user.
    pub fn render(value: &Value) -> String {
        format!("{:#}", value)
    }
}
