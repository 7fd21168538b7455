//! The page-load flow: handle a login callback, refresh the login/logout
//! affordances, then fetch the profile and call the API side by side.
//!
//! Presentation is behind [`Presenter`] so the same flow drives the CLI and
//! the tests.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::api::{ApiClient, ApiError};
use crate::auth::{AuthError, Authenticator, Profile, SessionManager, StorageError};
use crate::config::UnauthenticatedPolicy;

/// Where the flow's visible effects go.
pub trait Presenter: Send + Sync {
    /// A notification the user has to acknowledge.
    fn alert(&self, message: &str);

    /// Enable logout and show the authenticated view, or the reverse.
    fn set_authenticated(&self, authenticated: bool);

    fn show_profile(&self, profile: &Profile);

    fn show_api_result(&self, rendered: &str);
}

/// Everything a page load produced, for callers that want more than the
/// presenter saw.
#[derive(Debug)]
pub struct PageReport {
    pub authenticated: bool,
    /// Set when the callback carried an error or could not be parsed.
    pub login_error: Option<AuthError>,
    pub profile: Result<Profile, AuthError>,
    /// The rendered API response.
    pub api: Result<String, ApiError>,
}

pub struct App {
    sessions: Arc<SessionManager>,
    authenticator: Arc<dyn Authenticator>,
    api: ApiClient,
    presenter: Arc<dyn Presenter>,
    policy: UnauthenticatedPolicy,
}

impl App {
    pub fn new(
        sessions: Arc<SessionManager>,
        authenticator: Arc<dyn Authenticator>,
        api: ApiClient,
        presenter: Arc<dyn Presenter>,
        policy: UnauthenticatedPolicy,
    ) -> Self {
        Self {
            sessions,
            authenticator,
            api,
            presenter,
            policy,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start a login: the URL the user has to visit.
    pub fn login(&self) -> Result<Url, AuthError> {
        self.authenticator.authorize_url()
    }

    pub fn logout(&self) -> Result<(), StorageError> {
        self.sessions.end_session()?;
        self.display_buttons();
        Ok(())
    }

    /// Push the current authenticated state to the presenter.
    pub fn display_buttons(&self) -> bool {
        let authenticated = self.sessions.is_authenticated();
        self.presenter.set_authenticated(authenticated);
        authenticated
    }

    /// Run one page load. `callback` is the URL the provider redirected to,
    /// if this load is the end of a login.
    ///
    /// Only a failed session write is returned as an error; everything else
    /// is reported through the presenter and the [`PageReport`].
    pub async fn handle_authentication(
        &self,
        callback: Option<&str>,
    ) -> Result<PageReport, StorageError> {
        let mut login_error = None;

        if let Some(callback) = callback {
            match self.authenticator.parse_callback(callback).await {
                Ok(Some(result)) => {
                    info!(token_type = %result.token_type, expires_in = result.expires_in, "Login completed");
                    self.sessions.establish_session(&result)?;
                }
                Ok(None) => debug!("Callback carried no login result"),
                Err(e) => {
                    error!(error = %e, code = e.code(), "Login failed");
                    self.alert(&e);
                    login_error = Some(e);
                }
            }
        }

        let authenticated = self.display_buttons();

        let (profile, api) = futures::join!(self.fetch_user_info(), self.call_api());

        Ok(PageReport {
            authenticated,
            login_error,
            profile,
            api,
        })
    }

    /// Fetch and show the profile for the stored session.
    pub async fn fetch_user_info(&self) -> Result<Profile, AuthError> {
        let session = self.sessions.session();
        let token = match (&session, self.policy) {
            (Some(session), _) => Some(session.access_token.as_str()),
            (None, UnauthenticatedPolicy::Reject) => {
                debug!("No session, skipping profile fetch");
                return Err(AuthError::NotAuthenticated);
            }
            (None, UnauthenticatedPolicy::Attempt) => None,
        };

        match self.authenticator.user_info(token).await {
            Ok(profile) => {
                self.presenter.show_profile(&profile);
                Ok(profile)
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "Failed to fetch user info");
                self.alert(&e);
                Err(e)
            }
        }
    }

    /// Call the backend with the stored session and show the result.
    pub async fn call_api(&self) -> Result<String, ApiError> {
        let session = self.sessions.session();
        let value = self.api.call_api(session.as_ref()).await.map_err(|e| {
            warn!(error = %e, "API call failed");
            e
        })?;

        let rendered = ApiClient::render(&value);
        self.presenter.show_api_result(&rendered);
        Ok(rendered)
    }

    fn alert(&self, err: &AuthError) {
        self.presenter.alert(&format!(
            "Error: {}. Check the logs for further details.",
            err.code()
        ));
    }
}
