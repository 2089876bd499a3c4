//! # Notifications
//!
//! Client-side home for pushed notifications.
//!
//! ## Contained Modules:
//!
//! - **`store`**: `NotificationStore`, the bounded read/unread list and its
//!   toast side channel.
//! - **`cache`**: `NotificationCache` backends. `JsonFileCache` persists to
//!   the platform data directory; `MemoryCache` keeps everything in process.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Persistence backends.
pub mod cache;
/// Bounded notification list.
pub mod store;

pub use cache::{CacheError, JsonFileCache, MemoryCache, NotificationCache};
pub use store::{NotificationRecord, NotificationStore, Toast};
