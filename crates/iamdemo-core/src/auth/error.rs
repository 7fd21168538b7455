use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The provider redirected back with `error=...` or answered with one.
    #[error("{error}: {description}")]
    Provider { error: String, description: String },

    #[error("Login state does not match the login that was started")]
    StateMismatch,

    #[error("Malformed login callback: {0}")]
    MalformedCallback(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl AuthError {
    /// Short machine-readable code, the part shown in user-facing alerts.
    pub fn code(&self) -> &str {
        match self {
            AuthError::Provider { error, .. } => error,
            AuthError::StateMismatch => "invalid_state",
            AuthError::MalformedCallback(_) => "invalid_hash",
            AuthError::NotAuthenticated => "login_required",
            AuthError::InvalidUrl(_) => "invalid_configuration",
            AuthError::NetworkError(_) => "request_error",
        }
    }
}
