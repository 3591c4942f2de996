//! In-process session store for tests and embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::record;
use super::{validate_id, ScanReport, SessionStore, StoreError};
use crate::models::SessionState;

/// Keeps encoded records in memory, plus every checkpoint written per session.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    history: Arc<RwLock<HashMap<String, Vec<SessionState>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state saved for `id`, oldest first.
    pub async fn history(&self, id: &str) -> Vec<SessionState> {
        self.history
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Store raw bytes under `id`, bypassing encoding.
    pub async fn put_raw(&self, id: &str, bytes: Vec<u8>) {
        self.records.write().await.insert(id.to_string(), bytes);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        validate_id(&state.id)?;
        let bytes = record::encode(state)?;

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&state.id) {
            if let Ok(existing) = record::decode(&state.id, existing) {
                if existing.status.is_terminal() {
                    return Err(StoreError::ReadOnly(state.id.clone()));
                }
            }
        }
        records.insert(state.id.clone(), bytes);
        drop(records);

        self.history
            .write()
            .await
            .entry(state.id.clone())
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<SessionState, StoreError> {
        let records = self.records.read().await;
        let bytes = records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record::decode(id, bytes)
    }

    async fn scan(&self) -> Result<ScanReport, StoreError> {
        let records = self.records.read().await;
        let mut report = ScanReport::default();
        for (id, bytes) in records.iter() {
            match record::decode(id, bytes) {
                Ok(state) => report.sessions.push(state),
                Err(e) => report.corrupt.push((id.clone(), e.to_string())),
            }
        }
        report.sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryMode, ScrapeQuery, SessionStatus};
    use std::path::PathBuf;

    fn state() -> SessionState {
        let query = ScrapeQuery::new(QueryMode::Keywords, ["rust"]).unwrap();
        SessionState::new(query, PathBuf::from("rust.jsonl"))
    }

    #[tokio::test]
    async fn test_history_records_each_checkpoint() {
        let store = InMemorySessionStore::new();
        let mut session = state();
        store.save(&session).await.unwrap();
        session.collected = 25;
        store.save(&session).await.unwrap();

        let history = store.history(&session.id).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].collected, 25);
        assert_eq!(store.load(&session.id).await.unwrap().collected, 25);
    }

    #[tokio::test]
    async fn test_corrupt_raw_record_reported() {
        let store = InMemorySessionStore::new();
        let session = state();
        store.save(&session).await.unwrap();
        store.put_raw("bad-id", b"not json".to_vec()).await;

        let report = store.scan().await.unwrap();
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.corrupt[0].0, "bad-id");
    }

    #[tokio::test]
    async fn test_terminal_is_read_only() {
        let store = InMemorySessionStore::new();
        let mut session = state();
        session.status = SessionStatus::Completed;
        store.save(&session).await.unwrap();
        assert!(matches!(
            store.save(&session).await,
            Err(StoreError::ReadOnly(_))
        ));
    }
}
