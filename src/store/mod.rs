//! Durable session state storage.
//!
//! Each session is one record keyed by its id. A checkpoint replaces the
//! whole record atomically; terminal records are read-only.

mod file;
mod memory;
mod record;

pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;
pub use record::FORMAT_VERSION;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::models::SessionState;

/// Errors from session storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("session record {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("session {0} is terminal and cannot be modified")]
    ReadOnly(String),

    #[error("invalid session id '{0}'")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of reading every record.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub sessions: Vec<SessionState>,
    /// Records that could not be read, as `(id, reason)`.
    pub corrupt: Vec<(String, String)>,
}

/// Storage for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically replace the record for `state.id`.
    async fn save(&self, state: &SessionState) -> Result<(), StoreError>;

    async fn load(&self, id: &str) -> Result<SessionState, StoreError>;

    /// Read every record, reporting corrupt ones separately.
    async fn scan(&self) -> Result<ScanReport, StoreError>;

    /// Non-terminal sessions, most recently checkpointed first.
    async fn list_resumable(&self) -> Result<Vec<SessionState>, StoreError> {
        let report = self.scan().await?;
        for (id, reason) in &report.corrupt {
            warn!("Skipping corrupt session record {}: {}", id, reason);
        }
        let mut sessions: Vec<_> = report
            .sessions
            .into_iter()
            .filter(|s| s.is_resumable())
            .collect();
        sessions.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        Ok(sessions)
    }

    /// Load the session whose id equals or starts with `prefix`.
    async fn find(&self, prefix: &str) -> Result<SessionState, StoreError> {
        match self.load(prefix).await {
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidId(_)) => {}
            other => return other,
        }
        let report = self.scan().await?;
        let mut matches = report
            .sessions
            .into_iter()
            .filter(|s| s.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(state), None) if !prefix.is_empty() => Ok(state),
            _ => Err(StoreError::NotFound(prefix.to_string())),
        }
    }
}

/// Session ids are UUIDs; anything else could escape the store directory.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}
