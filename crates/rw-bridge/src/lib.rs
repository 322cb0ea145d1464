//! HTTP surface of the runwarden engine.
//!
//! - [`http_api`]: axum router over agents, executions, and providers
//! - [`api_error`]: error body and status mapping shared by every handler

pub mod api_error;
pub mod http_api;
