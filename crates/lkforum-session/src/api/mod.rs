//! REST API client module for the lkforum backend.
//!
//! This module provides the `AuthClient` for logging in, keeping the
//! session fresh and making authenticated calls.
//!
//! The API uses JWT bearer tokens obtained from `/api/auth/login` and
//! renewed through `/api/auth/refresh`.

pub mod client;
pub mod error;
pub mod request;

pub use client::AuthClient;
pub use error::{error_message, AuthError};
pub use request::{ApiResponse, RawResponse, RequestBody, RequestOptions};
