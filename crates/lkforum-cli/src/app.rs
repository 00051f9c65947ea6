//! Command handlers for the `lkforum` CLI.
//!
//! `App` wires the configuration, the session storage and the `AuthClient`
//! together. The client's reset hook only raises a flag here; `main` decides
//! what to tell the user once the command has finished.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use lkforum_session::auth::decode_claims;
use lkforum_session::{
    ApiResponse, AuthClient, AuthError, Config, LoginRequest, RequestOptions, StorageBackend,
};
use reqwest::Method;
use tracing::{debug, warn};

/// Environment variables consulted by `login` before prompting
const IDENTIFIER_ENV: &str = "LKFORUM_IDENTIFIER";
const PASSWORD_ENV: &str = "LKFORUM_PASSWORD";

pub struct App {
    pub config: Config,
    client: AuthClient,
    session_reset: Arc<AtomicBool>,
}

impl App {
    /// Load config, apply command line overrides and open the session
    pub fn new(base_url: Option<String>, storage: Option<StorageBackend>) -> Result<Self> {
        let mut config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        if let Some(storage) = storage {
            config.storage = storage;
        }

        let tokens = config.token_store().context("Failed to open session storage")?;
        let base_url = base_url.unwrap_or_else(|| config.base_url());
        debug!(%base_url, storage = %config.storage, "Session client configured");

        let session_reset = Arc::new(AtomicBool::new(false));
        let flag = session_reset.clone();
        let client = AuthClient::with_timeout(base_url, tokens, config.request_timeout())?
            .on_reset(move || flag.store(true, Ordering::SeqCst));

        Ok(Self {
            config,
            client,
            session_reset,
        })
    }

    /// Whether the session was torn down while running the command
    pub fn session_was_reset(&self) -> bool {
        self.session_reset.load(Ordering::SeqCst)
    }

    // ===== login =====

    pub async fn login(&mut self, identifier: Option<String>, password: Option<String>) -> Result<()> {
        let identifier = match identifier.or_else(|| std::env::var(IDENTIFIER_ENV).ok()) {
            Some(identifier) => identifier,
            None => self.prompt_identifier()?,
        };
        if identifier.is_empty() {
            anyhow::bail!("Username or email required");
        }

        let password = match password.or_else(|| std::env::var(PASSWORD_ENV).ok()) {
            Some(password) => password,
            None => rpassword::prompt_password("Password: ")?,
        };

        eprintln!("Authenticating...");
        let response = self
            .client
            .login(&LoginRequest::new(identifier.clone(), password))
            .await
            .map_err(|e| anyhow::anyhow!("Login failed: {}", e))?;

        self.config.last_identifier = Some(identifier);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!("Logged in as {}", response.user.display_name());
        Ok(())
    }

    fn prompt_identifier(&self) -> Result<String> {
        match self.config.last_identifier {
            Some(ref last) => print!("Username or email [{}]: ", last),
            None => print!("Username or email: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        Ok(match (input.is_empty(), self.config.last_identifier.as_ref()) {
            (true, Some(last)) => last.clone(),
            _ => input.to_string(),
        })
    }

    // ===== logout / status / whoami =====

    pub fn logout(&self) {
        self.client.logout();
        println!("Logged out");
    }

    pub fn status(&self) {
        let state = self.client.auth_state();
        println!("API:      {}", display_or(self.client.base_url(), "(not set)"));
        println!("Storage:  {}", self.config.storage);

        match state.user {
            Some(ref user) => println!("User:     {} ({})", user.display_name(), user.role),
            None => println!("User:     (none)"),
        }

        let Some(ref token) = state.token else {
            println!("Session:  not logged in");
            return;
        };

        let now = Utc::now().timestamp();
        match decode_claims(token) {
            Some(claims) if state.is_authenticated => {
                let minutes = claims.seconds_until_expiry(now) / 60;
                println!("Session:  active, access token expires in {}m", minutes);
            }
            Some(claims) => match claims.expires_at() {
                Some(at) => println!("Session:  access token expired at {}", at.to_rfc3339()),
                None => println!("Session:  access token has no expiry"),
            },
            None => println!("Session:  access token unreadable"),
        }

        if !state.is_authenticated {
            let refreshable = self.client.storage().refresh_token().is_some();
            if refreshable {
                println!("          (will refresh on next request)");
            } else {
                println!("          (log in again)");
            }
        }
    }

    pub fn whoami(&self) -> Result<()> {
        let user = self
            .client
            .storage()
            .user()
            .ok_or_else(|| anyhow::anyhow!("Not logged in"))?;
        println!("{}", user.username);
        debug!(id = %user.id, role = %user.role, "Stored user");
        Ok(())
    }

    // ===== fetch =====

    pub async fn fetch(&self, path: &str, method: &str, data: Option<String>) -> Result<()> {
        let mut options = RequestOptions::new(parse_method(method)?);
        if let Some(data) = data {
            let value: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            options = options.json(value);
        }

        match self.client.fetch(path, options).await {
            Ok(ApiResponse::Json(value)) => {
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
            Ok(ApiResponse::Raw(raw)) => {
                println!("{}", raw.text());
                Ok(())
            }
            Err(e @ AuthError::RequestRejected { .. }) => {
                let status = e.status().unwrap_or_default();
                Err(anyhow::anyhow!("Request failed ({}): {}", status, e))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Parse an HTTP method name, case-insensitively
fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("Invalid HTTP method '{}'", method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("Delete").unwrap(), Method::DELETE);
        assert!(parse_method("no such").is_err());
    }

    #[test]
    fn test_display_or() {
        assert_eq!(display_or("", "(not set)"), "(not set)");
        assert_eq!(display_or("http://api", "(not set)"), "http://api");
    }
}
