//! # HTTP Retrieval
//!
//! The request/response side of the client. The socket only pushes; writes
//! such as progress saves go through plain HTTP.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `ApiClient`, a thin wrapper over `reqwest-middleware` that
//!   joins relative paths onto the API base, injects the bearer token, and
//!   optionally retries transient failures.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Bearer-authenticated JSON client with optional retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
