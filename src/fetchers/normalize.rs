//! Tolerant normalizer for backend JSON.
//!
//! Both backends return loosely shaped post objects whose field names differ
//! by endpoint and version. Every accessor here tries the known variants in
//! order and never fails on a missing or oddly typed field.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{post_link, EngagementCounts, NormalizedItem};

const ITEM_CONTAINERS: &[&str] = &["data", "tweets", "statuses", "results", "items"];
const CURSOR_FIELDS: &[&str] = &["next_cursor", "cursor", "nextCursor", "next_token"];

const ID_FIELDS: &[&str] = &["tweet_id", "id_str", "id", "rest_id"];
const AUTHOR_FIELDS: &[&str] = &[
    "username",
    "screen_name",
    "user.screen_name",
    "user.username",
    "author.username",
    "author.screen_name",
];
const AUTHOR_NAME_FIELDS: &[&str] = &["user.name", "author.name", "display_name", "name"];
const TEXT_FIELDS: &[&str] = &["full_text", "text", "content", "legacy.full_text"];
const DATE_FIELDS: &[&str] = &["created_at", "timestamp", "date", "createdAt"];
const LINK_FIELDS: &[&str] = &["url", "tweet_url", "link"];

const LIKE_FIELDS: &[&str] = &[
    "like_count",
    "likes",
    "favorite_count",
    "likeCount",
    "public_metrics.like_count",
];
const REPOST_FIELDS: &[&str] = &[
    "retweet_count",
    "retweets",
    "reposts",
    "retweetCount",
    "public_metrics.retweet_count",
];
const REPLY_FIELDS: &[&str] = &[
    "reply_count",
    "replies",
    "replyCount",
    "public_metrics.reply_count",
];
const QUOTE_FIELDS: &[&str] = &[
    "quote_count",
    "quotes",
    "quoteCount",
    "public_metrics.quote_count",
];
const VIEW_FIELDS: &[&str] = &[
    "view_count",
    "views.count",
    "views",
    "viewCount",
    "public_metrics.impression_count",
];

const MEDIA_FIELDS: &[&str] = &["media", "extended_entities.media", "entities.media"];
const MEDIA_URL_FIELDS: &[&str] = &["media_url_https", "media_url", "url", "preview_image_url"];

/// Follow a dotted path through nested objects.
fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(raw, |value, key| value.get(key))
        .filter(|v| !v.is_null())
}

fn first<'a>(raw: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|p| lookup(raw, p))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(raw: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| lookup(raw, p).and_then(as_text))
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn count(raw: &Value, paths: &[&str]) -> u64 {
    paths
        .iter()
        .find_map(|p| lookup(raw, p).and_then(as_count))
        .unwrap_or(0)
}

fn flag(raw: &Value, path: &str) -> bool {
    match lookup(raw, path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        Some(Value::Number(_)) | Some(Value::Object(_)) => true,
        _ => false,
    }
}

/// Parse the timestamp formats the backends are known to use.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64()?;
            // Millisecond epochs are 13 digits for any date we care about.
            if secs > 100_000_000_000 {
                Utc.timestamp_millis_opt(secs).single()
            } else {
                Utc.timestamp_opt(secs, 0).single()
            }
        }
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    s.parse::<i64>()
        .ok()
        .and_then(|n| parse_timestamp(&Value::from(n)))
}

fn media_refs(raw: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    for path in MEDIA_FIELDS {
        if let Some(Value::Array(entries)) = lookup(raw, path) {
            for entry in entries {
                let url = match entry {
                    Value::String(s) => Some(s.clone()),
                    other => first_text(other, MEDIA_URL_FIELDS),
                };
                if let Some(url) = url {
                    if !refs.contains(&url) {
                        refs.push(url);
                    }
                }
            }
        }
        if !refs.is_empty() {
            break;
        }
    }
    refs
}

/// Normalize one raw post. Returns `None` when it has no identifier.
///
/// A post without a parseable timestamp is stamped with `fetched_at`.
pub fn normalize_item(raw: &Value, fetched_at: DateTime<Utc>) -> Option<NormalizedItem> {
    let Some(id) = first_text(raw, ID_FIELDS) else {
        debug!("Skipping item without identifier");
        return None;
    };

    let author = first_text(raw, AUTHOR_FIELDS)
        .map(|a| a.trim_start_matches('@').to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let author_name = first_text(raw, AUTHOR_NAME_FIELDS).unwrap_or_else(|| author.clone());
    let text = first_text(raw, TEXT_FIELDS).unwrap_or_default();

    let created_at = match first(raw, DATE_FIELDS).and_then(parse_timestamp) {
        Some(at) => at,
        None => {
            warn!("Item {} has no parseable timestamp, using fetch time", id);
            fetched_at
        }
    };

    let engagement = EngagementCounts {
        likes: count(raw, LIKE_FIELDS),
        reposts: count(raw, REPOST_FIELDS),
        replies: count(raw, REPLY_FIELDS),
        quotes: count(raw, QUOTE_FIELDS),
        views: count(raw, VIEW_FIELDS),
    };

    let link = first_text(raw, LINK_FIELDS)
        .filter(|u| u.starts_with("http"))
        .unwrap_or_else(|| post_link(&author, &id));

    let mut media = media_refs(raw);
    if media.is_empty() && flag(raw, "has_media") {
        media.push(link.clone());
    }

    let is_reply = text.starts_with('@')
        || flag(raw, "is_reply")
        || flag(raw, "in_reply_to_status_id_str")
        || flag(raw, "in_reply_to_status_id")
        || flag(raw, "in_reply_to_screen_name");
    let is_repost = text.starts_with("RT @")
        || flag(raw, "is_retweet")
        || flag(raw, "retweeted_status")
        || flag(raw, "retweeted_tweet");

    Some(NormalizedItem {
        id,
        author,
        author_name,
        created_at,
        text,
        engagement,
        media,
        link,
        is_reply,
        is_repost,
    })
}

/// Locate the list of raw posts in a response body.
pub fn extract_items(body: &Value) -> Vec<&Value> {
    fn walk(value: &Value, depth: usize) -> Option<Vec<&Value>> {
        match value {
            Value::Array(items) => Some(items.iter().collect()),
            Value::Object(_) if depth < 3 => ITEM_CONTAINERS
                .iter()
                .filter_map(|key| value.get(*key))
                .find_map(|inner| walk(inner, depth + 1)),
            _ => None,
        }
    }
    walk(body, 0).unwrap_or_default()
}

/// Locate a single post in a lookup response.
pub fn extract_single(body: &Value) -> Option<&Value> {
    if first_text(body, ID_FIELDS).is_some() {
        return Some(body);
    }
    ["data", "tweet", "result"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|inner| match inner {
            Value::Array(items) => items.first(),
            Value::Object(_) => extract_single(inner),
            _ => None,
        })
}

/// Next-page token, if the response carries a non-empty one.
pub fn extract_cursor(body: &Value) -> Option<String> {
    let direct = CURSOR_FIELDS
        .iter()
        .find_map(|key| body.get(*key).and_then(as_text));
    direct.or_else(|| {
        ["meta", "data", "pagination"]
            .iter()
            .filter_map(|key| body.get(*key))
            .filter(|v| v.is_object())
            .find_map(|inner| CURSOR_FIELDS.iter().find_map(|k| inner.get(*k).and_then(as_text)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_api_shape() {
        let raw = json!({
            "tweet_id": "1745000000000000001",
            "username": "alice",
            "text": "hello world",
            "created_at": "2024-01-15 10:30:00",
            "like_count": 12,
            "retweet_count": "3",
            "reply_count": 1,
            "view_count": 900,
            "media": ["https://pbs.example/a.jpg"]
        });
        let item = normalize_item(&raw, fetched_at()).unwrap();
        assert_eq!(item.id, "1745000000000000001");
        assert_eq!(item.author, "alice");
        assert_eq!(item.created_at, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
        assert_eq!(item.engagement.likes, 12);
        assert_eq!(item.engagement.reposts, 3);
        assert_eq!(item.engagement.views, 900);
        assert_eq!(item.media, vec!["https://pbs.example/a.jpg"]);
        assert_eq!(item.link, "https://x.com/alice/status/1745000000000000001");
        assert!(!item.is_reply);
    }

    #[test]
    fn test_legacy_shape() {
        let raw = json!({
            "id_str": "99",
            "full_text": "RT @bob: something",
            "created_at": "Wed Jan 10 08:00:00 +0000 2024",
            "favorite_count": 5,
            "user": {"screen_name": "carol", "name": "Carol C"},
            "entities": {"media": [{"media_url_https": "https://pbs.example/b.png"}]},
            "views": {"count": "1,234"}
        });
        let item = normalize_item(&raw, fetched_at()).unwrap();
        assert_eq!(item.id, "99");
        assert_eq!(item.author, "carol");
        assert_eq!(item.author_name, "Carol C");
        assert_eq!(item.engagement.likes, 5);
        assert_eq!(item.engagement.views, 1234);
        assert_eq!(item.created_at, Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap());
        assert!(item.is_repost);
        assert!(item.has_media());
    }

    #[test]
    fn test_reply_detection_and_missing_date() {
        let raw = json!({
            "id": 7,
            "text": "sure",
            "in_reply_to_status_id_str": "6",
            "author": {"username": "@dave"}
        });
        let item = normalize_item(&raw, fetched_at()).unwrap();
        assert_eq!(item.id, "7");
        assert_eq!(item.author, "dave");
        assert!(item.is_reply);
        assert_eq!(item.created_at, fetched_at());
    }

    #[test]
    fn test_item_without_id_is_skipped() {
        assert!(normalize_item(&json!({"text": "orphan"}), fetched_at()).is_none());
    }

    #[test]
    fn test_extract_items_from_containers() {
        assert_eq!(extract_items(&json!([{"id": 1}, {"id": 2}])).len(), 2);
        assert_eq!(extract_items(&json!({"data": [{"id": 1}]})).len(), 1);
        assert_eq!(extract_items(&json!({"data": {"tweets": [{"id": 1}, {"id": 2}]}})).len(), 2);
        assert_eq!(extract_items(&json!({"statuses": []})).len(), 0);
        assert!(extract_items(&json!({"error": "x"})).is_empty());
    }

    #[test]
    fn test_extract_cursor() {
        assert_eq!(extract_cursor(&json!({"next_cursor": "abc"})), Some("abc".to_string()));
        assert_eq!(extract_cursor(&json!({"meta": {"next_token": "t2"}})), Some("t2".to_string()));
        assert_eq!(extract_cursor(&json!({"next_cursor": ""})), None);
        assert_eq!(extract_cursor(&json!({"data": []})), None);
    }

    #[test]
    fn test_extract_single() {
        let body = json!({"data": {"id_str": "5", "text": "x"}});
        assert_eq!(extract_single(&body).and_then(|v| v.get("id_str")), Some(&json!("5")));
        assert!(extract_single(&json!({"errors": []})).is_none());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        for raw in [
            json!("2024-01-02T03:04:05Z"),
            json!("2024-01-02 03:04:05"),
            json!("Tue Jan 02 03:04:05 +0000 2024"),
            json!(1704164645),
            json!(1704164645000i64),
        ] {
            assert_eq!(parse_timestamp(&raw), Some(expected), "{}", raw);
        }
        assert_eq!(parse_timestamp(&json!("soon")), None);
    }
}
