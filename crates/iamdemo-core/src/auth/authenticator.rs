//! Hosted, redirect-based login against the identity provider.
//!
//! The front end sends the user to [`Authenticator::authorize_url`]. The
//! provider redirects back to the callback URL with the tokens in the URL
//! fragment, which [`Authenticator::parse_callback`] turns into an
//! [`AuthResult`]. The access token then unlocks the provider's user-info
//! endpoint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::error::AuthError;
use super::session::AuthResult;
use crate::api::error::truncate_body;
use crate::config::Config;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Length of the random `state` and `nonce` login parameters.
const LOGIN_PARAM_LENGTH: usize = 32;

/// User metadata from the provider's user-info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub nickname: String,
    pub picture: String,
    /// Everything else the provider returned (`name`, `sub`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Where to send the user to log in.
    fn authorize_url(&self) -> Result<Url, AuthError>;

    /// Interpret the URL the provider redirected back to.
    ///
    /// `Ok(None)` means the URL carries no login result at all.
    async fn parse_callback(&self, callback_url: &str) -> Result<Option<AuthResult>, AuthError>;

    /// Fetch the user's profile. `None` sends the request unauthenticated.
    async fn user_info(&self, access_token: Option<&str>) -> Result<Profile, AuthError>;
}

#[derive(Debug, Clone)]
struct PendingLogin {
    state: String,
    nonce: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    #[serde(default, alias = "error_description")]
    description: String,
}

pub struct HostedLogin {
    client: Client,
    base_url: String,
    client_id: String,
    callback_url: String,
    audience: String,
    response_type: String,
    scope: String,
    pending: Mutex<Option<PendingLogin>>,
}

impl HostedLogin {
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        // A bare tenant domain means https; a full URL is taken as-is
        let base_url = if config.domain.starts_with("http://")
            || config.domain.starts_with("https://")
        {
            config.domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", config.domain.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            base_url,
            client_id: config.client_id.clone(),
            callback_url: config.callback_url.clone(),
            audience: config.audience.clone(),
            response_type: config.response_type.clone(),
            scope: config.scope.clone(),
            pending: Mutex::new(None),
        })
    }

    fn random_param() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(LOGIN_PARAM_LENGTH)
            .map(char::from)
            .collect()
    }

    fn take_pending(&self) -> Option<PendingLogin> {
        match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Split the fragment of a callback URL into its parameters.
    ///
    /// Accepts a full URL or just the `#...` part.
    fn fragment_params(callback_url: &str) -> HashMap<String, String> {
        match callback_url.split_once('#') {
            Some((_, fragment)) => url::form_urlencoded::parse(fragment.as_bytes())
                .into_owned()
                .collect(),
            None => HashMap::new(),
        }
    }

    fn result_from_params(params: &HashMap<String, String>) -> Result<AuthResult, AuthError> {
        let expires_in = params
            .get("expires_in")
            .ok_or_else(|| AuthError::MalformedCallback("missing expires_in".to_string()))?;
        let expires_in: i64 = expires_in.parse().map_err(|_| {
            AuthError::MalformedCallback(format!("expires_in is not an integer: {}", expires_in))
        })?;

        Ok(AuthResult {
            access_token: params.get("access_token").cloned().unwrap_or_default(),
            id_token: params.get("id_token").cloned().unwrap_or_default(),
            token_type: params
                .get("token_type")
                .cloned()
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_in,
            scope: params.get("scope").cloned(),
            state: params.get("state").cloned(),
        })
    }
}

#[async_trait]
impl Authenticator for HostedLogin {
    fn authorize_url(&self) -> Result<Url, AuthError> {
        let pending = PendingLogin {
            state: Self::random_param(),
            nonce: Self::random_param(),
        };

        let mut url = Url::parse(&format!("{}/authorize", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.callback_url)
            .append_pair("audience", &self.audience)
            .append_pair("response_type", &self.response_type)
            .append_pair("scope", &self.scope)
            .append_pair("state", &pending.state)
            .append_pair("nonce", &pending.nonce);

        match self.pending.lock() {
            Ok(mut slot) => *slot = Some(pending),
            Err(poisoned) => *poisoned.into_inner() = Some(pending),
        }

        debug!(url = %url, "Built authorize URL");
        Ok(url)
    }

    async fn parse_callback(&self, callback_url: &str) -> Result<Option<AuthResult>, AuthError> {
        let params = Self::fragment_params(callback_url);
        let has_error = params.contains_key("error");
        let has_tokens = params.contains_key("access_token") || params.contains_key("id_token");
        if !has_error && !has_tokens {
            return Ok(None);
        }

        // Only a login started by this process can be checked
        if let Some(pending) = self.take_pending() {
            if params.get("state") != Some(&pending.state) {
                warn!("Callback state does not match pending login");
                return Err(AuthError::StateMismatch);
            }
            debug!(nonce = %pending.nonce, "Pending login matched");
        }

        if let Some(error) = params.get("error") {
            return Err(AuthError::Provider {
                error: error.clone(),
                description: params.get("error_description").cloned().unwrap_or_default(),
            });
        }

        let result = Self::result_from_params(&params)?;
        if result.access_token.is_empty() || result.id_token.is_empty() {
            debug!("Callback is missing a token, ignoring it");
            return Ok(None);
        }
        Ok(Some(result))
    }

    async fn user_info(&self, access_token: Option<&str>) -> Result<Profile, AuthError> {
        let url = format!("{}/userinfo", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ProviderErrorBody>(&body) {
                Ok(err) => AuthError::Provider {
                    error: err.error,
                    description: err.description,
                },
                Err(_) => AuthError::Provider {
                    error: format!("http_{}", status.as_u16()),
                    description: truncate_body(&body),
                },
            });
        }

        Ok(response.json().await?)
    }
}
