//! iamdemo - log in through the hosted login page, keep the session locally,
//! and call the demo backend with it.

mod presenter;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use iamdemo_core::auth::{FileStore, KeyringStore, MemoryStore};
use iamdemo_core::{
    backend, ApiClient, ApiError, App, AuthError, Config, HostedLogin, PageReport,
    SessionManager, SessionStore, StorageKind, SystemClock,
};

use presenter::TerminalPresenter;

#[derive(Parser)]
#[command(name = "iamdemo", version, about = "Hosted-login demo client and backend")]
struct Cli {
    /// Config file (defaults to ~/.config/iamdemo/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where the session is kept: file, keyring or memory
    #[arg(long, global = true, value_parser = parse_storage)]
    storage: Option<StorageKind>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the login URL, then read back the URL the browser landed on
    Login,
    /// Finish a login from the URL the browser was redirected to
    Callback { url: String },
    /// Show whether a valid session is stored
    Status,
    /// Remove the stored session
    Logout,
    /// Fetch the profile and call the backend with the stored session
    Call,
    /// Run the demo backend
    Serve,
}

fn parse_storage(s: &str) -> Result<StorageKind, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// Initialize the tracing subscriber for logging
fn init_tracing(default_level: &str, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Log file path has no file name"))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn open_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    Ok(match config.storage {
        StorageKind::File => Arc::new(FileStore::new(&config.cache_dir()?)),
        StorageKind::Keyring => Arc::new(KeyringStore::default()),
        StorageKind::Memory => Arc::new(MemoryStore::new()),
    })
}

fn build_app(config: &Config) -> Result<App> {
    let sessions = Arc::new(SessionManager::new(open_store(config)?, Arc::new(SystemClock)));
    let authenticator =
        Arc::new(HostedLogin::new(config).context("Failed to set up hosted login")?);
    let api = ApiClient::new(&config.server_url, config.unauthenticated_policy)
        .context("Failed to set up API client")?;

    Ok(App::new(
        sessions,
        authenticator,
        api,
        Arc::new(TerminalPresenter),
        config.unauthenticated_policy,
    ))
}

/// Turn a page load into the process outcome. API failures were never
/// handled by the page, so they end the command with an error.
fn finish(report: PageReport) -> Result<()> {
    if let Err(AuthError::NotAuthenticated) = report.profile {
        info!("Profile skipped, not logged in");
    }
    match report.api {
        Ok(_) => Ok(()),
        Err(ApiError::NotAuthenticated) => {
            info!("API call skipped, not logged in");
            Ok(())
        }
        Err(e) => Err(e).context("API call failed"),
    }
}

fn read_redirect_url() -> Result<String> {
    print!("Paste the URL your browser was redirected to: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read redirect URL")?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = match cli.command {
        Command::Serve => "info",
        _ => "warn",
    };
    let _log_guard = init_tracing(default_level, cli.log_file.as_ref())?;

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => Config::load()?,
    };
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }

    match cli.command {
        Command::Serve => backend::serve(&config).await,
        Command::Login => {
            let app = build_app(&config)?;
            println!("Open this URL in your browser to log in:\n\n{}\n", app.login()?);
            let redirect = read_redirect_url()?;
            finish(app.handle_authentication(Some(&redirect)).await?)
        }
        Command::Callback { url } => {
            let app = build_app(&config)?;
            finish(app.handle_authentication(Some(&url)).await?)
        }
        Command::Call => {
            let app = build_app(&config)?;
            finish(app.handle_authentication(None).await?)
        }
        Command::Status => {
            let app = build_app(&config)?;
            let sessions = app.sessions();
            if sessions.is_authenticated() {
                let minutes = sessions.remaining_millis() / 60_000;
                println!("Authenticated, session expires in {} minutes", minutes);
            } else if sessions.session().is_some() {
                println!("Session expired");
            } else {
                println!("Not authenticated");
            }
            Ok(())
        }
        Command::Logout => {
            let app = build_app(&config)?;
            app.logout().context("Failed to remove stored session")?;
            Ok(())
        }
    }
}
