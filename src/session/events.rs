//! Progress events emitted by a running session.

use std::time::Duration;

use crate::fetchers::ErrorKind;
use crate::models::SessionStatus;

/// Observable progress of one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        session_id: String,
        resumed: bool,
        collected: u64,
    },
    Status {
        session_id: String,
        status: SessionStatus,
    },
    Batch {
        session_id: String,
        fetched: usize,
        accepted: usize,
        collected: u64,
    },
    Checkpoint {
        session_id: String,
        collected: u64,
        cursor: Option<String>,
    },
    Retrying {
        session_id: String,
        kind: ErrorKind,
        attempt: u32,
        delay: Duration,
    },
    Finished {
        session_id: String,
        status: SessionStatus,
        collected: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Started { session_id, .. }
            | SessionEvent::Status { session_id, .. }
            | SessionEvent::Batch { session_id, .. }
            | SessionEvent::Checkpoint { session_id, .. }
            | SessionEvent::Retrying { session_id, .. }
            | SessionEvent::Finished { session_id, .. } => session_id,
        }
    }
}
