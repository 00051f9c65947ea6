//! Data models for the lkforum auth API.
//!
//! - `User`, `Role`: the user record returned by login and persisted locally
//! - `LoginRequest`, `LoginResponse`: login endpoint shapes
//! - `RefreshTokenRequest`, `RefreshTokenResponse`: refresh endpoint shapes

pub mod auth;
pub mod user;

pub use auth::{LoginRequest, LoginResponse, RefreshTokenRequest, RefreshTokenResponse};
pub use user::{Role, User};
