//! Session management for the lkforum API.
//!
//! This module provides:
//! - `TokenStore`: persisted access token, refresh token and user record
//! - `token`: client-side JWT expiry checks
//! - `AuthStore`: observable auth state for consumers
//!
//! The persisted session and the `AuthStore` are kept in step by
//! `AuthClient`; nothing else should write to both.

pub mod state;
pub mod storage;
pub mod token;

pub use state::{AuthState, AuthStore};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore, TokenStore};
pub use token::{decode_claims, is_token_expired, is_token_expired_at, Claims};
