//! The demo backend the front end calls.
//!
//! `GET /` is guarded by a permission check: the caller's `Authorization`
//! header is forwarded to the IAM service's `/allowed` endpoint together
//! with the resource and action being requested. The IAM reply becomes the
//! `user` in the response.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Permission `GET /` requires
pub const HELLO_RESOURCE: &str = "demo:hello";
pub const HELLO_ACTION: &str = "read";

/// Timeout for the IAM permission check.
const IAM_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("This JWT Access Token is not authorized.")]
    NotAllowed,

    #[error("IAM service unavailable: {0}")]
    IamUnavailable(String),
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BackendError::NotAllowed => {
                debug!("Permission denied by IAM");
                (StatusCode::FORBIDDEN, "not_allowed")
            }
            BackendError::IamUnavailable(reason) => {
                warn!(reason = %reason, "IAM check failed");
                (StatusCode::BAD_GATEWAY, "iam_unavailable")
            }
        };

        let body = Json(json!({
            "code": code,
            "description": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[derive(Clone)]
pub struct BackendState {
    client: Client,
    iam_server: String,
    audience: String,
    domain: String,
}

impl BackendState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(IAM_TIMEOUT_SECS))
            .build()
            .context("Failed to build IAM client")?;

        Ok(Self {
            client,
            iam_server: config.iam_server.trim_end_matches('/').to_string(),
            audience: config.audience.clone(),
            domain: config.domain.clone(),
        })
    }

    /// Ask the IAM service whether `authorization` may do `action` on
    /// `resource`. Returns the IAM reply when allowed.
    pub async fn authorize(
        &self,
        authorization: Option<&HeaderValue>,
        resource: &str,
        action: &str,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/allowed", self.iam_server);
        let mut request = self
            .client
            .post(&url)
            .header("Auth0-Audience", &self.audience)
            .header("Auth0-Domain", &self.domain)
            .json(&json!({
                "resource": resource,
                "action": action,
            }));
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::IamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::IamUnavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BackendError::IamUnavailable(format!("reply is not JSON: {}", e)))?;

        match payload.get("allowed").and_then(Value::as_bool) {
            Some(true) => Ok(payload),
            Some(false) => Err(BackendError::NotAllowed),
            None => Err(BackendError::IamUnavailable(
                "reply has no allowed flag".to_string(),
            )),
        }
    }
}

/// A valid access token is required to access this route
async fn hello(
    State(state): State<BackendState>,
    headers: HeaderMap,
) -> Result<Json<Value>, BackendError> {
    let user = state
        .authorize(headers.get(header::AUTHORIZATION), HELLO_RESOURCE, HELLO_ACTION)
        .await?;

    Ok(Json(json!({
        "success": true,
        "user": user,
    })))
}

pub fn router(state: BackendState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(hello))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `0.0.0.0:<port>` and serve until the process is stopped.
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    info!(domain = %config.domain, audience = %config.audience, "Starting demo backend");

    let state = BackendState::new(config)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(address = %addr, iam_server = %config.iam_server, "Listening");
    axum::serve(listener, router(state))
        .await
        .context("Demo backend stopped unexpectedly")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn spawn_backend(iam: &MockServer) -> String {
        let config = Config {
            iam_server: iam.uri(),
            audience: "https://api.example.com".to_string(),
            domain: "tenant.example.com".to_string(),
            ..Config::default()
        };
        let app = router(BackendState::new(&config).unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_allowed_request_returns_user() {
        let iam = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/allowed"))
            .and(header_is("authorization", "Bearer a"))
            .and(header_is("auth0-audience", "https://api.example.com"))
            .and(header_is("auth0-domain", "tenant.example.com"))
            .and(body_json(json!({"resource": "demo:hello", "action": "read"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"allowed": true, "sub": "u1"})),
            )
            .expect(1)
            .mount(&iam)
            .await;

        let base = spawn_backend(&iam).await;
        let response = reqwest::Client::new()
            .get(format!("{}/", base))
            .header("Authorization", "Bearer a")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({"success": true, "user": {"allowed": true, "sub": "u1"}})
        );
    }

    #[tokio::test]
    async fn test_denied_request_is_forbidden() {
        let iam = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/allowed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": false})))
            .mount(&iam)
            .await;

        let base = spawn_backend(&iam).await;
        let response = reqwest::get(format!("{}/", base)).await.unwrap();

        assert_eq!(response.status(), 403);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "not_allowed");
        assert_eq!(body["description"], "This JWT Access Token is not authorized.");
    }

    #[tokio::test]
    async fn test_iam_failure_is_bad_gateway() {
        let iam = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&iam)
            .await;

        let base = spawn_backend(&iam).await;
        let response = reqwest::get(format!("{}/", base)).await.unwrap();

        assert_eq!(response.status(), 502);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "iam_unavailable");
    }

    #[tokio::test]
    async fn test_reply_without_flag_is_rejected() {
        let iam = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "u1"})))
            .mount(&iam)
            .await;

        let config = Config {
            iam_server: iam.uri(),
            ..Config::default()
        };
        let state = BackendState::new(&config).unwrap();
        let err = state.authorize(None, HELLO_RESOURCE, HELLO_ACTION).await.unwrap_err();
        assert!(matches!(err, BackendError::IamUnavailable(_)));
    }
}
