//! CSV export.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::warn;

use super::{open_for_append, AppendOutcome, IdIndex, Sink, SinkError};
use crate::models::{EngagementCounts, NormalizedItem};

pub const CSV_COLUMNS: &[&str] = &[
    "id",
    "date",
    "username",
    "display_name",
    "text",
    "likes",
    "reposts",
    "replies",
    "quotes",
    "views",
    "media",
    "link",
    "is_reply",
    "is_repost",
];

/// Comma-separated rows with a header line.
#[derive(Debug, Default)]
pub struct CsvSink {
    index: IdIndex,
}

impl CsvSink {
    pub fn new() -> Self {
        Self::default()
    }
}

fn csv_error(path: &Path, source: ::csv::Error) -> SinkError {
    SinkError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn read_ids(path: &Path) -> Result<HashSet<String>, SinkError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let Some(id_col) = headers.iter().position(|h| h == "id") else {
        warn!("{} has no id column, duplicates cannot be detected", path.display());
        return Ok(HashSet::new());
    };

    let mut ids = HashSet::new();
    for record in reader.records() {
        match record {
            Ok(record) => {
                if let Some(id) = record.get(id_col).filter(|id| !id.is_empty()) {
                    ids.insert(id.to_string());
                }
            }
            Err(e) => warn!("Ignoring unreadable row in {}: {}", path.display(), e),
        }
    }
    Ok(ids)
}

/// Every readable row of a CSV export, mapped back through the header.
pub fn read_items(path: &Path) -> Result<Vec<NormalizedItem>, SinkError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();

    let mut items = Vec::new();
    for (n, record) in reader.records().enumerate() {
        let parsed = record
            .map_err(|e| e.to_string())
            .and_then(|record| parse_row(&headers, &record));
        match parsed {
            Ok(item) => items.push(item),
            Err(e) => warn!("Ignoring row {} in {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(items)
}

fn parse_row(
    headers: &::csv::StringRecord,
    record: &::csv::StringRecord,
) -> Result<NormalizedItem, String> {
    let field = |name: &str| column(headers, record, name);
    let count = |name: &str| -> u64 { field(name).parse().unwrap_or(0) };

    let id = field("id");
    if id.is_empty() {
        return Err("missing id".to_string());
    }
    let created_at = NaiveDateTime::parse_from_str(field("date"), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| format!("bad date: {}", e))?
        .and_utc();

    let mut item = NormalizedItem::new(id, field("username"), created_at, field("text"));
    if !field("display_name").is_empty() {
        item.author_name = field("display_name").to_string();
    }
    if !field("link").is_empty() {
        item.link = field("link").to_string();
    }
    item.engagement = EngagementCounts {
        likes: count("likes"),
        reposts: count("reposts"),
        replies: count("replies"),
        quotes: count("quotes"),
        views: count("views"),
    };
    item.media = field("media").split_whitespace().map(str::to_string).collect();
    item.is_reply = field("is_reply") == "true";
    item.is_repost = field("is_repost") == "true";
    Ok(item)
}

fn column<'r>(
    headers: &::csv::StringRecord,
    record: &'r ::csv::StringRecord,
    name: &str,
) -> &'r str {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|i| record.get(i))
        .unwrap_or("")
}

fn row(item: &NormalizedItem) -> Vec<String> {
    vec![
        item.id.clone(),
        item.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        item.author.clone(),
        item.author_name.clone(),
        item.text.clone(),
        item.engagement.likes.to_string(),
        item.engagement.reposts.to_string(),
        item.engagement.replies.to_string(),
        item.engagement.quotes.to_string(),
        item.engagement.views.to_string(),
        item.media.join(" "),
        item.link.clone(),
        item.is_reply.to_string(),
        item.is_repost.to_string(),
    ]
}

fn write_items(path: &Path, items: &[&NormalizedItem]) -> Result<(), SinkError> {
    let (file, empty) = open_for_append(path)?;
    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if empty {
        writer
            .write_record(CSV_COLUMNS)
            .map_err(|e| csv_error(path, e))?;
    }
    for item in items {
        writer
            .write_record(row(item))
            .map_err(|e| csv_error(path, e))?;
    }

    let file = writer
        .into_inner()
        .map_err(|e| SinkError::io(path, e.into_error()))?;
    file.sync_data().map_err(|e| SinkError::io(path, e))
}

#[async_trait]
impl Sink for CsvSink {
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

    fn item(id: &str, text: &str) -> NormalizedItem {
        let at = Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap();
        let mut item = NormalizedItem::new(id, "alice", at, text);
        item.engagement.likes = 4;
        item
    }

    #[tokio::test]
    async fn test_header_written_once_and_rows_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let sink = CsvSink::new();
        sink.append(&[item("1", "a"), item("2", "b")], &path)
            .await
            .unwrap();
        let outcome = CsvSink::new()
            .append(&[item("2", "b"), item("3", "with, comma\nand newline")], &path)
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome { written: 1, skipped: 1 });

        let mut reader = ::csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            CSV_COLUMNS.to_vec()
        );
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][0], "3");
        assert_eq!(&rows[2][4], "with, comma\nand newline");
        assert_eq!(&rows[0][1], "2024-01-09 14:00:00");
        assert_eq!(&rows[0][5], "4");
    }

    #[tokio::test]
    async fn test_rows_read_back_as_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut reply = item("7", "@bob agreed, see\nthread");
        reply.is_reply = true;
        reply.media = vec!["https://img/1.jpg".to_string(), "https://img/2.jpg".to_string()];
        reply.engagement.views = 900;
        CsvSink::new()
            .append(&[item("6", "plain"), reply], &path)
            .await
            .unwrap();

        let read = read_items(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].id, "7");
        assert_eq!(read[1].text, "@bob agreed, see\nthread");
        assert!(read[1].is_reply);
        assert_eq!(read[1].media.len(), 2);
        assert_eq!(read[1].engagement.likes, 4);
        assert_eq!(read[1].engagement.views, 900);
        assert_eq!(read[0].created_at, Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap());
        assert_eq!(read[0].link, "https://x.com/alice/status/6");
    }
}
