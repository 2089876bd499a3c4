//! # Progress API
//!
//! Request/response side of progress sync: the upsert body, the stored
//! record the server echoes back, and the HTTP writer that posts one to the
//! other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retrieve::ApiClient;

/// Path of the upsert endpoint, relative to the API base.
pub const PROGRESS_PATH: &str = "progress";

/// Errors raised by a [`ProgressWriter`].
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Building or sending the request failed, or the body did not decode.
    #[error("progress request failed: {0}")]
    Request(#[from] anyhow::Error),

    /// The server answered with a non-2xx status.
    #[error("progress write rejected with status {status}: {}", .body.as_deref().unwrap_or(""))]
    Status {
        /// HTTP status.
        status: u16,
        /// Raw response body.
        body: Option<String>,
    },

    /// A 2xx response without a body.
    #[error("progress write returned an empty body")]
    EmptyBody,
}

/// Upsert body for one (course, content) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressWrite {
    /// Course id.
    pub course_id: String,
    /// Content id.
    pub content_id: String,
    /// 0-100.
    pub progress_percentage: u8,
    /// Whole seconds.
    pub last_position: u64,
    /// Sticky completion flag.
    pub completed: bool,
}

/// Stored progress as echoed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Row id.
    #[serde(default)]
    pub id: Option<String>,
    /// Owner.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Course id.
    pub course_id: String,
    /// Content id.
    pub content_id: String,
    /// 0-100.
    pub progress_percentage: u8,
    /// Whole seconds. Rows saved without a position carry `null`.
    #[serde(default)]
    pub last_position: Option<u64>,
    /// Stored completion flag.
    #[serde(default)]
    pub completed: bool,
    /// Last server-side update.
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ProgressRecord {
    /// The write that would reproduce this record.
    pub fn as_write(&self) -> ProgressWrite {
        ProgressWrite {
            course_id: self.course_id.clone(),
            content_id: self.content_id.clone(),
            progress_percentage: self.progress_percentage,
            last_position: self.last_position.unwrap_or(0),
            completed: self.completed,
        }
    }
}

/// Destination of coalesced progress writes.
#[async_trait]
pub trait ProgressWriter: Send + Sync {
    /// Upserts one record and returns what the server stored.
    async fn save(&self, write: &ProgressWrite) -> Result<ProgressRecord, ProgressError>;
}

/// Writer that posts to `<api_base>/progress`.
#[derive(Debug, Clone)]
pub struct HttpProgressWriter {
    client: ApiClient,
}

impl HttpProgressWriter {
    /// Wraps an existing client.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Builds a client for `api_base` with the bearer `token`.
    pub fn connect(api_base: &str, token: &str, max_retries: u32) -> Result<Self, ProgressError> {
        Ok(Self::new(ApiClient::new(api_base, Some(token.to_string()), max_retries)?))
    }
}

#[async_trait]
impl ProgressWriter for HttpProgressWriter {
    async fn save(&self, write: &ProgressWrite) -> Result<ProgressRecord, ProgressError> {
        let response = self
            .client
            .post_json::<_, ProgressRecord>(PROGRESS_PATH, write)
            .await?;
        if !response.success {
            return Err(ProgressError::Status {
                status: response.status,
                body: response.error_body,
            });
        }
        response.data.ok_or(ProgressError::EmptyBody)
    }
}
