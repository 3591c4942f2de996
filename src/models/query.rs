//! Scrape query definition and validation.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::filters::{matches_keywords, EngagementFilters};
use super::item::NormalizedItem;

const LABEL_MAX_LEN: usize = 40;

/// Errors raised while building or validating a query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("no targets given for {0} query")]
    EmptyTargets(QueryMode),

    #[error("invalid date '{0}' (expected YYYY-MM-DD or YYYY-MM-DD_HH:MM:SS)")]
    InvalidDate(String),

    #[error("time window starts at {start} which is after its end {end}")]
    InvertedWindow {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("no post id found in link '{0}'")]
    InvalidLink(String),
}

/// What the targets of a query are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Identity,
    Keywords,
    Links,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Identity => "identity",
            QueryMode::Keywords => "keywords",
            QueryMode::Links => "links",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrieval backend a session is bound to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Cookie-authenticated web backend.
    #[default]
    Web,
    /// Paid HTTP API.
    Api,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Web => "web",
            BackendKind::Api => "api",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export file format.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Csv,
    Jsonl,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Inclusive time window, open on either side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimeWindow {
    /// Parse user-supplied bounds.
    ///
    /// A start without a time means start of day, an end without a time
    /// means the last second of that day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, QueryError> {
        let window = Self {
            start: start.map(|s| parse_bound(s, false)).transpose()?,
            end: end.map(|s| parse_bound(s, true)).transpose()?,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(QueryError::InvertedWindow { start, end });
            }
        }
        Ok(())
    }

    /// Timestamps are compared in UTC.
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        let at = at.naive_utc();
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

fn parse_bound(raw: &str, end_of_day: bool) -> Result<NaiveDateTime, QueryError> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d_%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| QueryError::InvalidDate(raw.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    time.map(|t| date.and_time(t))
        .ok_or_else(|| QueryError::InvalidDate(raw.to_string()))
}

static POST_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|mobile\.)?(?:twitter\.com|x\.com)/\w+/status/(\d+)").unwrap()
});

/// Extract the numeric post id from a post link, or accept a bare id.
pub fn extract_post_id(link: &str) -> Option<String> {
    let link = link.trim();
    if !link.is_empty() && link.chars().all(|c| c.is_ascii_digit()) {
        return Some(link.to_string());
    }
    POST_LINK
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Immutable description of what a session fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeQuery {
    pub mode: QueryMode,
    pub targets: Vec<String>,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub window: TimeWindow,
    #[serde(default)]
    pub filters: EngagementFilters,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub format: ExportFormat,
}

impl ScrapeQuery {
    /// Build a query, normalizing and validating its targets.
    ///
    /// Blank targets are dropped and a leading `@` is stripped from
    /// identities. Links must each carry a post id.
    pub fn new<I, S>(mode: QueryMode, targets: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let query = Self {
            mode,
            targets: normalize_targets(mode, targets),
            match_all: false,
            window: TimeWindow::default(),
            filters: EngagementFilters::default(),
            backend: BackendKind::default(),
            format: ExportFormat::default(),
        };
        query.validate()?;
        Ok(query)
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_filters(mut self, filters: EngagementFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_match_all(mut self, match_all: bool) -> Self {
        self.match_all = match_all;
        self
    }

    /// Check every invariant. Used for freshly built and for deserialized queries.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(QueryError::EmptyTargets(self.mode));
        }
        if self.mode == QueryMode::Links {
            for link in &self.targets {
                if extract_post_id(link).is_none() {
                    return Err(QueryError::InvalidLink(link.clone()));
                }
            }
        }
        self.window.validate()
    }

    /// A resumed session must target the same thing as the requested query.
    pub fn is_compatible_with(&self, other: &ScrapeQuery) -> bool {
        self.mode == other.mode && self.targets == other.targets
    }

    /// Derive a single-identity query from this one, keeping every other setting.
    pub fn for_identity(&self, identity: &str) -> Result<Self, QueryError> {
        let mut query = self.clone();
        query.mode = QueryMode::Identity;
        query.targets = normalize_targets(QueryMode::Identity, [identity]);
        query.validate()?;
        Ok(query)
    }

    /// Post ids for link mode, in target order.
    pub fn post_ids(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter_map(|link| extract_post_id(link))
            .collect()
    }

    /// Whether a fetched item passes the window, keyword and engagement filters.
    pub fn admits(&self, item: &NormalizedItem) -> bool {
        if !self.window.contains(&item.created_at) {
            return false;
        }
        if self.mode == QueryMode::Keywords
            && !matches_keywords(&item.text, &self.targets, self.match_all)
        {
            return false;
        }
        self.filters.accepts(item)
    }

    /// Filesystem-safe label used for export file names.
    pub fn label(&self) -> String {
        if self.mode == QueryMode::Links {
            return "links".to_string();
        }
        let joined = self.targets.join("_");
        let mut label: String = joined
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .take(LABEL_MAX_LEN)
            .collect();
        if label.trim_matches('_').is_empty() {
            label = self.mode.as_str().to_string();
        }
        label
    }

    /// Short human description.
    pub fn describe(&self) -> String {
        match self.mode {
            QueryMode::Identity => self
                .targets
                .iter()
                .map(|t| format!("@{}", t))
                .collect::<Vec<_>>()
                .join(", "),
            QueryMode::Keywords => {
                let joiner = if self.match_all { " AND " } else { " OR " };
                self.targets.join(joiner)
            }
            QueryMode::Links => format!("{} link(s)", self.targets.len()),
        }
    }
}

fn normalize_targets<I, S>(mode: QueryMode, targets: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    targets
        .into_iter()
        .map(|t| {
            let trimmed = t.as_ref().trim();
            match mode {
                QueryMode::Identity => trimmed.trim_start_matches('@').trim().to_string(),
                _ => trimmed.to_string(),
            }
        })
        .filter(|t| !t.is_empty())
        .collect()
}
