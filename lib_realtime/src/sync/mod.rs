//! # Progress Sync
//!
//! Client-to-server half of the transport: playback samples in, coalesced
//! progress upserts out. Independent of the socket.
//!
//! ## Contained Modules:
//!
//! - **`progress_sync`**: `ProgressSync`, the per-content debouncer with the
//!   sticky completion rule.
//! - **`progress_api`**: the upsert body, the stored record, the
//!   `ProgressWriter` trait and its HTTP implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Upsert endpoint types and writer.
pub mod progress_api;
/// Debounced per-content sync.
pub mod progress_sync;

pub use progress_api::{HttpProgressWriter, ProgressError, ProgressRecord, ProgressWrite, ProgressWriter};
pub use progress_sync::{progress_percentage, CompletionLedger, ProgressSync, ProgressTarget};
