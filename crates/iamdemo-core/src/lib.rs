//! iamdemo core - session lifecycle, hosted login, API client and the demo
//! backend.
//!
//! The front end (CLI) wires these together through [`app::App`]; the demo
//! backend in [`backend`] is the server the front end calls.

pub mod api;
pub mod app;
pub mod auth;
pub mod backend;
pub mod config;

pub use api::{ApiClient, ApiError};
pub use app::{App, PageReport, Presenter};
pub use auth::{
    AuthError, AuthResult, Authenticator, Clock, HostedLogin, Profile, SessionManager,
    SessionState, SessionStore, StorageError, SystemClock,
};
pub use config::{Config, StorageKind, UnauthenticatedPolicy};
