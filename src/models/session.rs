//! Durable session state.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::query::ScrapeQuery;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    AwaitingCredential,
    AwaitingNetwork,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    /// Terminal sessions are read-only and never resumed in place.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::AwaitingCredential => "awaiting_credential",
            SessionStatus::AwaitingNetwork => "awaiting_network",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resumable scrape job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub query: ScrapeQuery,
    /// Backend token for the start of the page being processed. `None` is the beginning.
    pub cursor: Option<String>,
    /// Items of the cursor's page that are already checkpointed.
    #[serde(default)]
    pub page_ids: Vec<String>,
    pub collected: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub checkpointed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_paths: Vec<PathBuf>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Terminal session this one continues.
    #[serde(default)]
    pub supersedes: Option<String>,
}

impl SessionState {
    /// Fresh running session writing to `output_path`.
    pub fn new(query: ScrapeQuery, output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query,
            cursor: None,
            page_ids: Vec::new(),
            collected: 0,
            status: SessionStatus::Running,
            created_at: Utc::now(),
            checkpointed_at: None,
            output_paths: vec![output_path],
            last_error: None,
            supersedes: None,
        }
    }

    /// New session continuing a terminal one from its cursor.
    ///
    /// The old record stays untouched; the new one appends to the same output.
    pub fn supersede(&self) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: self.query.clone(),
            cursor: self.cursor.clone(),
            page_ids: self.page_ids.clone(),
            collected: self.collected,
            status: SessionStatus::Running,
            created_at: Utc::now(),
            checkpointed_at: None,
            output_paths: self.output_paths.clone(),
            last_error: None,
            supersedes: Some(self.id.clone()),
        }
    }

    pub fn is_resumable(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Destination the sink appends to.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_paths.last().map(|p| p.as_path())
    }

    /// Most recent point in time this session was observed at.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.checkpointed_at.unwrap_or(self.created_at)
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {} via {}: {} collected",
            short_id(&self.id),
            self.status,
            self.query.describe(),
            self.query.backend,
            self.collected
        )
    }
}

/// First block of a UUID, enough to tell sessions apart in a listing.
pub(crate) fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}
