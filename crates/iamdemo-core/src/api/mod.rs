//! Client for the demo backend API.
//!
//! The backend exposes a single `GET /` that answers with JSON once the
//! caller's access token is authorized. The `Authorization` header is built
//! from the stored session's token type and access token.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
