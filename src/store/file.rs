//! Session records as JSON files in one directory.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use super::record;
use super::{validate_id, ScanReport, SessionStore, StoreError};
use crate::models::SessionState;

/// Stores each session at `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open a store, creating its directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read(&self, id: &str) -> Result<SessionState, StoreError> {
        validate_id(id)?;
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        record::decode(id, &bytes)
    }
}

/// Write via a temp file in the same directory, fsync, then rename over the target.
fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    #[cfg(unix)]
    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        validate_id(&state.id)?;
        if let Ok(existing) = self.read(&state.id).await {
            if existing.status.is_terminal() {
                return Err(StoreError::ReadOnly(state.id.clone()));
            }
        }

        let bytes = record::encode(state)?;
        let dir = self.dir.clone();
        let target = self.path_for(&state.id);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(io::Error::other)??;

        debug!(
            "Checkpointed session {} ({}, {} collected)",
            state.id, state.status, state.collected
        );
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<SessionState, StoreError> {
        self.read(id).await
    }

    async fn scan(&self) -> Result<ScanReport, StoreError> {
        let mut report = ScanReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match self.read(&id).await {
                Ok(state) => report.sessions.push(state),
                Err(e) => report.corrupt.push((id, e.to_string())),
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
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn state(target: &str) -> SessionState {
        let query = ScrapeQuery::new(QueryMode::Identity, [target]).unwrap();
        SessionState::new(query, PathBuf::from(format!("{}.csv", target)))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions")).unwrap();

        let mut session = state("alice");
        session.cursor = Some("c1".to_string());
        session.collected = 25;
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.id).await.unwrap();
        assert_eq!(loaded, session);
        assert!(store.dir().join(format!("{}.json", session.id)).exists());
    }

    #[tokio::test]
    async fn test_load_missing_and_invalid_ids() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.load("0000-missing").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_list_resumable_skips_terminal_and_orders_by_checkpoint() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        let now = Utc::now();

        let mut older = state("older");
        older.checkpointed_at = Some(now - Duration::minutes(10));
        let mut newer = state("newer");
        newer.status = SessionStatus::AwaitingNetwork;
        newer.checkpointed_at = Some(now);
        let mut done = state("done");
        done.status = SessionStatus::Completed;

        for s in [&older, &newer, &done] {
            store.save(s).await.unwrap();
        }

        let ids: Vec<String> = store
            .list_resumable()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id.clone()]);
    }

    #[tokio::test]
    async fn test_corrupt_record_does_not_hide_others() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        let healthy = state("healthy");
        store.save(&healthy).await.unwrap();
        let broken = state("broken");
        store.save(&broken).await.unwrap();

        // Simulate a torn write from an older, non-atomic writer.
        let path = dir.path().join(format!("{}.json", broken.id));
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        // Leftover temp files are ignored.
        std::fs::write(dir.path().join(".tmpX1y2"), b"partial").unwrap();

        assert!(matches!(
            store.load(&broken.id).await,
            Err(StoreError::Corrupt { .. })
        ));

        let report = store.scan().await.unwrap();
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.sessions[0].id, healthy.id);
        assert_eq!(report.corrupt.len(), 1);
        assert_eq!(report.corrupt[0].0, broken.id);

        let resumable = store.list_resumable().await.unwrap();
        assert_eq!(resumable.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_record_is_read_only() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        let mut session = state("alice");
        session.status = SessionStatus::Stopped;
        store.save(&session).await.unwrap();

        session.collected = 99;
        assert!(matches!(
            store.save(&session).await,
            Err(StoreError::ReadOnly(_))
        ));
        assert_eq!(store.load(&session.id).await.unwrap().collected, 0);
    }

    #[tokio::test]
    async fn test_find_by_prefix() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        let session = state("alice");
        store.save(&session).await.unwrap();

        let found = store.find(&session.id[..8]).await.unwrap();
        assert_eq!(found.id, session.id);
        assert!(matches!(
            store.find("zzzz").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
