//! Session client for the lkforum REST API.
//!
//! Logs in, persists the access/refresh token pair and user record, refreshes
//! expired access tokens on demand, and exposes the auth state through an
//! observable `AuthStore`.
//!
//! ```no_run
//! use lkforum_session::{AuthClient, LoginRequest, RequestOptions, TokenStore};
//!
//! # async fn run() -> Result<(), lkforum_session::AuthError> {
//! let client = AuthClient::new("http://localhost:8080", TokenStore::in_memory())?;
//! client.login(&LoginRequest::new("alice", "secret")).await?;
//! let posts = client.fetch("/api/posts", RequestOptions::get()).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiResponse, AuthClient, AuthError, RequestOptions};
pub use auth::{AuthState, AuthStore, TokenStore};
pub use config::{Config, StorageBackend};
pub use models::{LoginRequest, LoginResponse, Role, User};
