//! lkforum - command line client for the lkforum API.
//!
//! Logs in, keeps the session in local storage and makes authenticated
//! requests, refreshing the access token when it has expired.

mod app;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use lkforum_session::{Config, StorageBackend};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

/// Log file name, written to the cache directory with `--log-file`
const LOG_FILE: &str = "lkforum.log";

#[derive(Parser, Debug)]
#[command(name = "lkforum", version, about = "lkforum API session client")]
struct Cli {
    /// Base URL for relative API paths
    #[arg(long, global = true, env = "LKFORUM_API_BASE_URL")]
    base_url: Option<String>,

    /// Session storage backend: file, keyring or memory
    #[arg(long, global = true)]
    storage: Option<StorageBackend>,

    /// Also write logs to lkforum.log in the cache directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session
    Login {
        /// Username or email
        #[arg(long, short)]
        identifier: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the current auth state
    Status,
    /// Print the logged in username
    Whoami,
    /// Make an authenticated request and print the response
    Fetch {
        /// Path relative to the base URL, or an absolute URL
        path: String,
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,
        /// JSON request body
        #[arg(long, short)]
        data: Option<String>,
    },
}

/// Plain, never-rotated log file in `dir`, creating the directory if needed
fn file_appender(dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE)
        .build(dir)
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(|dir| (file_appender(&dir), dir)) {
        Some((Ok(appender), _)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Some((Err(e), dir)) => {
            file_error = Some((dir, e));
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    if let Some((dir, e)) = file_error {
        warn!(dir = %dir.display(), error = %e, "Log file unavailable, logging to stderr only");
    }

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_dir = if cli.log_file {
        Config::default().cache_dir().ok()
    } else {
        None
    };
    let _guard = init_tracing(log_dir);
    info!("lkforum starting");

    let mut app = App::new(cli.base_url, cli.storage)?;

    let is_logout = matches!(cli.command, Command::Logout);
    let result = match cli.command {
        Command::Login {
            identifier,
            password,
        } => app.login(identifier, password).await,
        Command::Logout => {
            app.logout();
            Ok(())
        }
        Command::Status => {
            app.status();
            Ok(())
        }
        Command::Whoami => app.whoami(),
        Command::Fetch { path, method, data } => app.fetch(&path, &method, data).await,
    };

    if app.session_was_reset() && !is_logout {
        eprintln!("Session ended. Run `lkforum login` to sign in again.");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_appender_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("cache").join("lkforum");
        assert!(file_appender(&log_dir).is_ok());
        assert!(log_dir.join(LOG_FILE).exists());
    }

    #[test]
    fn test_file_appender_fails_without_panicking() {
        // A cache "directory" that is really a regular file
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(file_appender(file.path()).is_err());
        assert!(file_appender(&file.path().join("lkforum")).is_err());
    }
}
