//! Export sinks.
//!
//! A sink appends normalized items to a destination file and skips items
//! whose identifier is already there, so re-sending a batch after a crash
//! or a retry never duplicates rows.

mod csv;
mod jsonl;

pub use self::csv::{CsvSink, CSV_COLUMNS};
pub use self::jsonl::JsonlSink;

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use thiserror::Error;

use crate::models::{ExportFormat, NormalizedItem, ScrapeQuery};

/// Errors from writing or reading back an export file.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        SinkError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How many items an append wrote and how many were already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub written: usize,
    pub skipped: usize,
}

/// Persistence destination for normalized items.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Append `items` to `destination`, skipping identifiers already written there.
    async fn append(
        &self,
        items: &[NormalizedItem],
        destination: &Path,
    ) -> Result<AppendOutcome, SinkError>;
}

/// Sink for an export format.
pub fn sink_for(format: ExportFormat) -> Arc<dyn Sink> {
    match format {
        ExportFormat::Csv => Arc::new(CsvSink::new()),
        ExportFormat::Jsonl => Arc::new(JsonlSink::new()),
    }
}

/// Read back the items of an export written in `format`.
pub fn read_export(path: &Path, format: ExportFormat) -> Result<Vec<NormalizedItem>, SinkError> {
    match format {
        ExportFormat::Csv => self::csv::read_items(path),
        ExportFormat::Jsonl => jsonl::read_items(path),
    }
}

/// Export file path: `<dir>/<label>_<YYYYMMDD_HHMMSS>.<ext>`.
pub fn export_path(dir: &Path, query: &ScrapeQuery, at: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "{}_{}.{}",
        query.label(),
        at.format("%Y%m%d_%H%M%S"),
        query.format.extension()
    ))
}

/// Identifiers known to be present in a destination. `None` until the file
/// has been read back.
type KnownIds = Arc<Mutex<Option<HashSet<String>>>>;

/// Identifiers known to be present in each destination.
///
/// A destination's identifiers are read from the file the first time it is
/// appended to in this process, and again after a failed write. Each
/// destination has its own lock, so sessions writing different files never
/// wait on each other.
#[derive(Debug, Default)]
pub(crate) struct IdIndex {
    destinations: Mutex<HashMap<PathBuf, KnownIds>>,
}

impl IdIndex {
    fn known(&self, destination: &Path) -> KnownIds {
        let mut destinations = self.destinations.lock().unwrap_or_else(|e| e.into_inner());
        destinations
            .entry(destination.to_path_buf())
            .or_default()
            .clone()
    }

    /// Write the items not yet present, then record them as present.
    ///
    /// File I/O runs on the blocking pool.
    pub(crate) async fn append_new<L, W>(
        &self,
        destination: &Path,
        items: &[NormalizedItem],
        load: L,
        write: W,
    ) -> Result<AppendOutcome, SinkError>
    where
        L: FnOnce(&Path) -> Result<HashSet<String>, SinkError> + Send + 'static,
        W: FnOnce(&Path, &[&NormalizedItem]) -> Result<(), SinkError> + Send + 'static,
    {
        let known = self.known(destination);
        let path = destination.to_path_buf();
        let items = items.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut known = known.lock().unwrap_or_else(|e| e.into_inner());
            append_locked(&mut known, &path, &items, load, write)
        })
        .await
        .map_err(|e| SinkError::io(destination, io::Error::other(e)))?
    }
}

fn append_locked<L, W>(
    known: &mut Option<HashSet<String>>,
    destination: &Path,
    items: &[NormalizedItem],
    load: L,
    write: W,
) -> Result<AppendOutcome, SinkError>
where
    L: FnOnce(&Path) -> Result<HashSet<String>, SinkError>,
    W: FnOnce(&Path, &[&NormalizedItem]) -> Result<(), SinkError>,
{
    if known.is_none() {
        let existing = if destination.exists() {
            load(destination)?
        } else {
            HashSet::new()
        };
        *known = Some(existing);
    }
    let present = known.get_or_insert_with(HashSet::new);

    let mut batch_ids = HashSet::new();
    let fresh: Vec<&NormalizedItem> = items
        .iter()
        .filter(|item| !present.contains(&item.id) && batch_ids.insert(item.id.as_str()))
        .collect();

    if !fresh.is_empty() {
        if let Err(e) = write(destination, &fresh) {
            // Some rows may have landed; trust the file, not the cache.
            *known = None;
            return Err(e);
        }
        present.extend(fresh.iter().map(|item| item.id.clone()));
    }

    Ok(AppendOutcome {
        written: fresh.len(),
        skipped: items.len() - fresh.len(),
    })
}

/// Open `path` for appending, creating it and its parent directory.
///
/// Returns the file and whether it was empty. A file whose last line was
/// cut short by a crash gets a newline first so new records start cleanly.
pub(crate) fn open_for_append(path: &Path) -> Result<(File, bool), SinkError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| SinkError::io(path, e))?;

    let len = file.metadata().map_err(|e| SinkError::io(path, e))?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| SinkError::io(path, e))?;
        if last[0] != b'\n' {
            file.write_all(b"\n").map_err(|e| SinkError::io(path, e))?;
        }
    }
    Ok((file, len == 0))
}
