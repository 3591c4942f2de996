//! Client-side engagement and keyword filters.

use serde::{Deserialize, Serialize};

use super::item::NormalizedItem;

/// Engagement thresholds and content exclusions applied to every fetched item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementFilters {
    pub min_likes: u64,
    pub min_reposts: u64,
    pub min_replies: u64,
    pub exclude_replies: bool,
    pub exclude_reposts: bool,
    pub media_only: bool,
}

impl EngagementFilters {
    /// True when no filter would drop anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn accepts(&self, item: &NormalizedItem) -> bool {
        if item.engagement.likes < self.min_likes
            || item.engagement.reposts < self.min_reposts
            || item.engagement.replies < self.min_replies
        {
            return false;
        }
        if self.exclude_replies && item.is_reply {
            return false;
        }
        if self.exclude_reposts && item.is_repost {
            return false;
        }
        if self.media_only && !item.has_media() {
            return false;
        }
        true
    }
}

/// Case-insensitive keyword match against post text.
///
/// With `match_all` every keyword must appear, otherwise any one suffices.
/// An empty keyword list matches everything.
pub fn matches_keywords(text: &str, keywords: &[String], match_all: bool) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = text.to_lowercase();
    let mut hits = keywords
        .iter()
        .map(|k| haystack.contains(&k.to_lowercase()));
    if match_all {
        hits.all(|hit| hit)
    } else {
        hits.any(|hit| hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(likes: u64) -> NormalizedItem {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        let mut item = NormalizedItem::new(likes.to_string(), "alice", at, "Rust async runtime");
        item.engagement.likes = likes;
        item
    }

    #[test]
    fn test_min_likes_drops_exactly_items_below_threshold() {
        let filters = EngagementFilters {
            min_likes: 10,
            ..Default::default()
        };
        let kept: Vec<u64> = (0..20)
            .map(item)
            .filter(|i| filters.accepts(i))
            .map(|i| i.engagement.likes)
            .collect();
        assert_eq!(kept, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_exclusions() {
        let mut reply = item(5);
        reply.is_reply = true;
        let mut repost = item(5);
        repost.is_repost = true;

        let filters = EngagementFilters {
            exclude_replies: true,
            exclude_reposts: true,
            ..Default::default()
        };
        assert!(!filters.accepts(&reply));
        assert!(!filters.accepts(&repost));
        assert!(filters.accepts(&item(5)));
    }

    #[test]
    fn test_media_only() {
        let filters = EngagementFilters {
            media_only: true,
            ..Default::default()
        };
        let mut with_media = item(1);
        with_media.media.push("https://pbs.example/img.jpg".to_string());
        assert!(filters.accepts(&with_media));
        assert!(!filters.accepts(&item(1)));
        assert!(!filters.is_empty());
        assert!(EngagementFilters::default().is_empty());
    }

    #[test]
    fn test_keyword_match_any_and_all() {
        let keywords = vec!["rust".to_string(), "python".to_string()];
        assert!(matches_keywords("Learning RUST today", &keywords, false));
        assert!(!matches_keywords("Learning RUST today", &keywords, true));
        assert!(matches_keywords("rust and python", &keywords, true));
        assert!(matches_keywords("anything", &[], true));
    }
}
