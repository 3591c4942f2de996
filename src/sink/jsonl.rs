//! JSON Lines export.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{open_for_append, AppendOutcome, IdIndex, Sink, SinkError};
use crate::models::NormalizedItem;

/// One JSON object per line.
#[derive(Debug, Default)]
pub struct JsonlSink {
    index: IdIndex,
}

impl JsonlSink {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_ids(path: &Path) -> Result<HashSet<String>, SinkError> {
    let file = std::fs::File::open(path).map_err(|e| SinkError::io(path, e))?;
    let mut ids = HashSet::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SinkError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(value) => {
                if let Some(id) = value.get("id").and_then(Value::as_str) {
                    ids.insert(id.to_string());
                }
            }
            Err(_) => warn!("Ignoring unreadable line {} in {}", n + 1, path.display()),
        }
    }
    Ok(ids)
}

/// Every readable item in a JSON Lines export. Torn or foreign lines are skipped.
pub fn read_items(path: &Path) -> Result<Vec<NormalizedItem>, SinkError> {
    let file = std::fs::File::open(path).map_err(|e| SinkError::io(path, e))?;
    let mut items = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SinkError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<NormalizedItem>(&line) {
            Ok(item) => items.push(item),
            Err(_) => warn!("Ignoring unreadable line {} in {}", n + 1, path.display()),
        }
    }
    Ok(items)
}

fn write_items(path: &Path, items: &[&NormalizedItem]) -> Result<(), SinkError> {
    let (mut file, _) = open_for_append(path)?;
    let mut buf = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buf, item)?;
        buf.push(b'\n');
    }
    file.write_all(&buf).map_err(|e| SinkError::io(path, e))?;
    file.sync_data().map_err(|e| SinkError::io(path, e))
}

#[async_trait]
impl Sink for JsonlSink {
    async fn append(
        &self,
        items: &[NormalizedItem],
        destination: &Path,
    ) -> Result<AppendOutcome, SinkError> {
        self.index
            .append_new(destination, items, read_ids, write_items)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn items(ids: std::ops::Range<u32>) -> Vec<NormalizedItem> {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ids.map(|i| NormalizedItem::new(i.to_string(), "alice", at, format!("post {}", i)))
            .collect()
    }

    fn line_ids(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<NormalizedItem>(l).unwrap().id)
            .collect()
    }

    #[tokio::test]
    async fn test_overlapping_appends_equal_union() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = JsonlSink::new();

        let first = sink.append(&items(0..10), &path).await.unwrap();
        let second = sink.append(&items(5..15), &path).await.unwrap();

        assert_eq!(first, AppendOutcome { written: 10, skipped: 0 });
        assert_eq!(second, AppendOutcome { written: 5, skipped: 5 });

        let union = dir.path().join("union.jsonl");
        JsonlSink::new().append(&items(0..15), &union).await.unwrap();
        assert_eq!(line_ids(&path), line_ids(&union));
    }

    #[tokio::test]
    async fn test_existing_file_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        JsonlSink::new().append(&items(0..3), &path).await.unwrap();

        // A fresh sink, as after a restart.
        let outcome = JsonlSink::new().append(&items(2..5), &path).await.unwrap();
        assert_eq!(outcome, AppendOutcome { written: 2, skipped: 1 });
        assert_eq!(line_ids(&path), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_duplicates_within_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut batch = items(0..2);
        batch.extend(items(0..2));

        let outcome = JsonlSink::new().append(&batch, &path).await.unwrap();
        assert_eq!(outcome, AppendOutcome { written: 2, skipped: 2 });
    }

    #[tokio::test]
    async fn test_read_items_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        JsonlSink::new().append(&items(0..3), &path).await.unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"3\",\"auth").unwrap();

        let read: Vec<String> = read_items(&path).unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(read, vec!["0", "1", "2"]);
    }
}
