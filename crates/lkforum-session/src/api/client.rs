//! Authenticated client for the lkforum REST API.
//!
//! `AuthClient` owns the session: it logs in, keeps the persisted tokens and
//! the `AuthStore` in step, refreshes the access token when it has expired,
//! and attaches it to every call made through `fetch`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{is_token_expired, AuthState, AuthStore, TokenStore};
use crate::config::Config;
use crate::models::{LoginRequest, LoginResponse, RefreshTokenRequest, RefreshTokenResponse};

use super::error::truncate_body;
use super::request::{ApiResponse, RawResponse, RequestBody, RequestOptions};
use super::AuthError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/api/auth/login";

const REFRESH_PATH: &str = "/api/auth/refresh";

type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// Session-aware API client.
/// Clone is cheap - clones share the connection pool, storage and auth state.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
    storage: TokenStore,
    state: AuthStore,
    on_reset: Option<ResetHook>,
}

impl AuthClient {
    /// Create a client; the auth state is computed from `storage`.
    pub fn new(base_url: impl Into<String>, storage: TokenStore) -> Result<Self, AuthError> {
        Self::with_timeout(base_url, storage, None)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        storage: TokenStore,
        timeout: Option<Duration>,
    ) -> Result<Self, AuthError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url, storage))
    }

    /// Build from an existing reqwest client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>, storage: TokenStore) -> Self {
        let state = AuthStore::from_storage(&storage);
        Self {
            client,
            base_url: base_url.into(),
            storage,
            state,
            on_reset: None,
        }
    }

    pub fn from_config(config: &Config, storage: TokenStore) -> Result<Self, AuthError> {
        Self::with_timeout(config.base_url(), storage, config.request_timeout())
    }

    /// Register the hook run at the end of `logout`, which should discard
    /// any in-memory state derived from the old session.
    pub fn on_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(hook));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn storage(&self) -> &TokenStore {
        &self.storage
    }

    /// Handle to the observable auth state
    pub fn auth_store(&self) -> &AuthStore {
        &self.state
    }

    pub fn auth_state(&self) -> AuthState {
        self.state.current()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Absolute URLs pass through; anything else is appended to the base URL.
    pub fn resolve_url(&self, path: &str) -> Result<Url, AuthError> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if self.base_url.ends_with('/') && path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}{}", self.base_url, path)
        };
        Url::parse(&url).map_err(|e| AuthError::InvalidUrl(format!("{}: {}", url, e)))
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AuthError> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    /// Turn a non-success response into `RequestRejected`
    async fn rejected(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let body = response.bytes().await.ok();
        if let Some(ref body) = body {
            debug!(
                status = status.as_u16(),
                body = %truncate_body(&String::from_utf8_lossy(body)),
                "Request rejected"
            );
        }
        AuthError::rejected(status, body.as_deref())
    }

    // ===== Login / Logout =====

    /// Log in and persist the new session
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let url = self.resolve_url(LOGIN_PATH)?;

        let response = self.client.post(url).json(credentials).send().await?;
        if !response.status().is_success() {
            let err = Self::rejected(response).await;
            warn!(identifier = %credentials.identifier, error = %err, "Login failed");
            return Err(err);
        }

        let login: LoginResponse = Self::read_json(response).await?;

        self.storage
            .save_session(&login.access_token, &login.refresh_token, &login.user);
        self.state
            .set_authenticated(login.user.clone(), login.access_token.clone());

        info!(user = %login.user.username, "Login successful");
        Ok(login)
    }

    /// Drop the session everywhere, then run the reset hook
    pub fn logout(&self) {
        self.storage.clear_all();
        self.state.clear();
        info!("Logged out");

        if let Some(ref hook) = self.on_reset {
            hook();
        }
    }

    // ===== Session acquisition =====

    /// A currently usable access token, refreshing it if the stored one has expired.
    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.storage.access_token() {
            if !is_token_expired(&token) {
                return Ok(token);
            }
            debug!("Stored access token has expired");
        }

        let refresh_token = self.storage.refresh_token().ok_or(AuthError::NoSession)?;
        self.refresh(&refresh_token).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let url = self.resolve_url(REFRESH_PATH)?;
        let body = RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        };

        let response = match self.client.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token refresh request failed");
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token refresh rejected");
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
            });
        }

        let tokens: RefreshTokenResponse = Self::read_json(response).await?;
        self.storage
            .save_tokens(&tokens.access_token, &tokens.refresh_token);
        self.state.set_token(tokens.access_token.clone());

        info!("Access token refreshed");
        Ok(tokens.access_token)
    }

    // ===== Authenticated requests =====

    /// Perform an authenticated call.
    ///
    /// Failing to obtain a token, or a 401 from the server, ends the session
    /// through `logout` before the error is returned. A successful response
    /// is returned as JSON when it parses, raw otherwise.
    pub async fn fetch(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, AuthError> {
        let token = match self.valid_access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "No usable session");
                self.logout();
                return Err(e);
            }
        };

        let url = self.resolve_url(path)?;
        let is_multipart = options.is_multipart();
        let RequestOptions {
            method,
            mut headers,
            body,
        } = options;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            AuthError::InvalidResponse("access token is not a valid header value".to_string())
        })?;
        headers.insert(header::AUTHORIZATION, bearer);
        if !is_multipart {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        debug!(%method, %url, "Sending authenticated request");
        let mut request = self.client.request(method, url).headers(headers);
        request = match body {
            Some(RequestBody::Json(value)) => request.body(serde_json::to_vec(&value)?),
            Some(RequestBody::Text(text)) => request.body(text),
            Some(RequestBody::Bytes(bytes)) => request.body(bytes),
            Some(RequestBody::Multipart(form)) => request.multipart(form),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            info!("Server rejected access token");
            self.logout();
            return Err(AuthError::Expired);
        }

        if !status.is_success() {
            return Err(Self::rejected(response).await);
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => Ok(ApiResponse::Json(value)),
            Err(_) => Ok(ApiResponse::Raw(RawResponse {
                status,
                headers,
                body: body.to_vec(),
            })),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        self.fetch(path, RequestOptions::get()).await?.parse()
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = RequestOptions::post().json_from(body)?;
        self.fetch(path, options).await?.parse()
    }
}
