//! REST API client module for the VaultKey service.
//!
//! This module provides:
//! - `AuthBackend`: the contract for the auth endpoints (sign-in, second
//!   factor, renewal exchange, who-am-I, sign-out), with `HttpAuthBackend`
//!   as the reqwest implementation
//! - `ApiClient`: the authenticated client for product endpoints; attaches
//!   the bearer credential and retries exactly once after a renewal when a
//!   call comes back 401
//!
//! The API uses short-lived bearer credentials obtained through the
//! /auth endpoints.

pub mod backend;
pub mod client;
pub mod error;

pub use backend::{AuthBackend, HttpAuthBackend};
pub use client::{ApiClient, ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use error::ApiError;
