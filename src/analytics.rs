//! Post-scrape summary of collected posts.

use std::collections::HashSet;

use chrono::{Datelike, Timelike, Weekday};
use tracing::warn;

use crate::models::{NormalizedItem, SessionState};
use crate::sink::{read_export, SinkError};

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Longest top-post excerpt, in characters.
const EXCERPT_CHARS: usize = 100;

/// The most liked post of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TopPost {
    pub excerpt: String,
    pub likes: u64,
    pub link: String,
}

/// Totals, averages and activity patterns over a set of posts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeAnalytics {
    pub total: u64,
    pub unique_authors: usize,
    /// Calendar days from the oldest to the newest post, inclusive.
    pub span_days: i64,

    pub total_likes: u64,
    pub total_reposts: u64,
    pub total_replies: u64,
    pub total_views: u64,
    pub avg_likes: f64,
    pub avg_reposts: f64,
    pub avg_replies: f64,
    pub max_reposts: u64,
    pub top_post: Option<TopPost>,

    /// Weekday and hour are taken in UTC.
    pub most_active_day: Option<Weekday>,
    pub most_active_hour: Option<u32>,
    pub posts_per_day: f64,

    pub avg_text_chars: f64,
    pub with_media: u64,
    pub with_links: u64,
    pub replies: u64,
    pub reposts: u64,
}

impl ScrapeAnalytics {
    pub fn from_items(items: &[NormalizedItem]) -> Self {
        let mut analytics = Self::default();
        if items.is_empty() {
            return analytics;
        }

        let mut authors = HashSet::new();
        let mut days = [0u64; 7];
        let mut hours = [0u64; 24];
        let mut text_chars = 0usize;

        for item in items {
            if !item.author.is_empty() {
                authors.insert(item.author.as_str());
            }

            let counts = &item.engagement;
            analytics.total_likes += counts.likes;
            analytics.total_reposts += counts.reposts;
            analytics.total_replies += counts.replies;
            analytics.total_views += counts.views;
            analytics.max_reposts = analytics.max_reposts.max(counts.reposts);

            let best = analytics.top_post.as_ref().map_or(0, |top| top.likes);
            if counts.likes > best {
                analytics.top_post = Some(TopPost {
                    excerpt: item.text.chars().take(EXCERPT_CHARS).collect(),
                    likes: counts.likes,
                    link: item.link.clone(),
                });
            }

            days[item.created_at.weekday().num_days_from_monday() as usize] += 1;
            hours[item.created_at.hour() as usize] += 1;

            text_chars += item.text.chars().count();
            if item.is_repost || item.text.starts_with("RT @") {
                analytics.reposts += 1;
            }
            if item.is_reply || item.text.starts_with('@') {
                analytics.replies += 1;
            }
            if item.has_media() {
                analytics.with_media += 1;
            }
            if item.text.contains("http") {
                analytics.with_links += 1;
            }
        }

        let n = items.len() as f64;
        analytics.total = items.len() as u64;
        analytics.unique_authors = authors.len();
        analytics.avg_likes = analytics.total_likes as f64 / n;
        analytics.avg_reposts = analytics.total_reposts as f64 / n;
        analytics.avg_replies = analytics.total_replies as f64 / n;
        analytics.avg_text_chars = text_chars as f64 / n;

        let oldest = items.iter().map(|i| i.created_at.date_naive()).min();
        let newest = items.iter().map(|i| i.created_at.date_naive()).max();
        if let (Some(oldest), Some(newest)) = (oldest, newest) {
            analytics.span_days = (newest - oldest).num_days() + 1;
            analytics.posts_per_day = n / analytics.span_days as f64;
        }

        analytics.most_active_day = busiest(&days).map(|d| WEEK[d]);
        analytics.most_active_hour = busiest(&hours).map(|h| h as u32);
        analytics
    }

    /// Summarize everything a session exported so far.
    ///
    /// Missing export files are skipped. A post appearing in several of the
    /// session's files counts once.
    pub fn for_session(session: &SessionState) -> Result<Self, SinkError> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for path in &session.output_paths {
            if !path.exists() {
                warn!("Export {} no longer exists", path.display());
                continue;
            }
            for item in read_export(path, session.query.format)? {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                }
            }
        }
        Ok(Self::from_items(&items))
    }
}

/// Index of the largest count, earliest on ties. `None` when all are zero.
fn busiest(counts: &[u64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &count) in counts.iter().enumerate() {
        if count > best.map_or(0, |b| counts[b]) {
            best = Some(i);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::models::{ExportFormat, QueryMode, ScrapeQuery};
    use crate::sink::{CsvSink, Sink};

    fn post(id: &str, day: u32, hour: u32, likes: u64, text: &str) -> NormalizedItem {
        let at = Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap();
        let mut item = NormalizedItem::new(id, "alice", at, text);
        item.engagement.likes = likes;
        item.engagement.reposts = likes / 2;
        item
    }

    #[test]
    fn test_empty_set_is_all_zero() {
        let analytics = ScrapeAnalytics::from_items(&[]);
        assert_eq!(analytics, ScrapeAnalytics::default());
        assert!(analytics.most_active_day.is_none());
    }

    #[test]
    fn test_totals_and_patterns() {
        // 2024-01-01 was a Monday.
        let mut reply = post("3", 1, 9, 10, "@bob same here");
        reply.author = "carol".to_string();
        let mut photo = post("4", 3, 21, 0, "look https://t.co/x");
        photo.media = vec!["https://img/1.jpg".to_string()];
        let items = vec![
            post("1", 1, 9, 4, "morning"),
            post("2", 1, 14, 30, "the big one"),
            reply,
            photo,
        ];

        let a = ScrapeAnalytics::from_items(&items);
        assert_eq!(a.total, 4);
        assert_eq!(a.unique_authors, 2);
        assert_eq!(a.total_likes, 44);
        assert_eq!(a.avg_likes, 11.0);
        assert_eq!(a.max_reposts, 15);
        assert_eq!(a.span_days, 3);
        assert!((a.posts_per_day - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(a.most_active_day, Some(Weekday::Mon));
        assert_eq!(a.most_active_hour, Some(9));
        assert_eq!(a.replies, 1);
        assert_eq!(a.with_media, 1);
        assert_eq!(a.with_links, 1);

        let top = a.top_post.unwrap();
        assert_eq!(top.likes, 30);
        assert_eq!(top.link, "https://x.com/alice/status/2");
    }

    #[test]
    fn test_unliked_posts_have_no_top_post() {
        let a = ScrapeAnalytics::from_items(&[post("1", 2, 8, 0, "quiet")]);
        assert!(a.top_post.is_none());
        assert_eq!(a.most_active_hour, Some(8));
    }

    #[test]
    fn test_top_post_excerpt_is_truncated() {
        let long = "é".repeat(150);
        let a = ScrapeAnalytics::from_items(&[post("1", 2, 8, 3, &long)]);
        assert_eq!(a.top_post.unwrap().excerpt.chars().count(), EXCERPT_CHARS);
    }

    #[tokio::test]
    async fn test_session_summary_reads_every_export() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        let sink = CsvSink::new();
        sink.append(&[post("1", 1, 9, 2, "a"), post("2", 1, 9, 2, "b")], &first)
            .await
            .unwrap();
        sink.append(&[post("2", 1, 9, 2, "b"), post("3", 2, 9, 2, "c")], &second)
            .await
            .unwrap();

        let query = ScrapeQuery::new(QueryMode::Identity, ["alice"])
            .unwrap()
            .with_format(ExportFormat::Csv);
        let mut session = SessionState::new(query, first.clone());
        session.output_paths = vec![first, second, dir.path().join("gone.csv")];

        let a = ScrapeAnalytics::for_session(&session).unwrap();
        assert_eq!(a.total, 3);
        assert_eq!(a.total_likes, 6);
    }
}
