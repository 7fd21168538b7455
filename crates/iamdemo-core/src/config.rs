//! Application configuration management.
//!
//! Configuration is stored at `~/.config/iamdemo/config.json`. Every field
//! has a default matching the hosted demo tenant, and environment variables
//! override whatever the file says.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "iamdemo";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_DOMAIN: &str = "minimal-demo-iam.auth0.com";
const DEFAULT_CLIENT_ID: &str = "WYRYpJyS5DnDyxLTRVGCQGCWGo2KNQLN";
const DEFAULT_CALLBACK_URL: &str = "http://localhost:3000/";
const DEFAULT_AUDIENCE: &str = "http://minimal-demo-iam.localhost:8000";
const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
const DEFAULT_IAM_SERVER: &str = "http://localhost:8080";
const DEFAULT_PORT: u16 = 8000;

/// What to do when a collaborator needs the session but none is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnauthenticatedPolicy {
    /// Fail locally without touching the network.
    #[default]
    Reject,
    /// Send the request without credentials and let the server decide.
    Attempt,
}

/// Backend for the persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" => Ok(StorageKind::Keyring),
            "memory" => Ok(StorageKind::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity provider tenant domain, without scheme.
    pub domain: String,
    pub client_id: String,
    /// Where the provider redirects after login.
    pub callback_url: String,
    /// API identifier the access token is issued for.
    pub audience: String,
    pub response_type: String,
    pub scope: String,
    /// Base URL of the backend API the front end calls.
    pub server_url: String,
    /// Policy service the demo backend asks for permission.
    pub iam_server: String,
    /// Port the demo backend listens on.
    pub port: u16,
    pub storage: StorageKind,
    pub unauthenticated_policy: UnauthenticatedPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            callback_url: DEFAULT_CALLBACK_URL.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            response_type: "token id_token".to_string(),
            scope: "openid profile".to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            iam_server: DEFAULT_IAM_SERVER.to_string(),
            port: DEFAULT_PORT,
            storage: StorageKind::default(),
            unauthenticated_policy: UnauthenticatedPolicy::default(),
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (normally the process env).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AUTH0_DOMAIN") {
            self.domain = v;
        }
        if let Some(v) = lookup("AUTH0_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("AUTH0_CALLBACK_URL") {
            self.callback_url = v;
        }
        // API_ID is the name the backend has always used for the audience
        if let Some(v) = lookup("API_AUDIENCE").or_else(|| lookup("API_ID")) {
            self.audience = v;
        }
        if let Some(v) = lookup("SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("IAM_SERVER") {
            self.iam_server = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = v
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", v))?;
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
