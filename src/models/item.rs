//! Normalized post model shared by every backend and sink.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engagement counters reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    #[serde(default)]
    pub quotes: u64,
    #[serde(default)]
    pub views: u64,
}

/// A single post in backend-independent form.
///
/// Two items are equal when their identifiers are equal, whatever the
/// engagement counts say at the time of fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub engagement: EngagementCounts,
    #[serde(default)]
    pub media: Vec<String>,
    pub link: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_repost: bool,
}

impl NormalizedItem {
    /// Create an item with zero engagement and a canonical link.
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        created_at: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let author = author.into();
        let link = post_link(&author, &id);
        Self {
            id,
            author_name: author.clone(),
            author,
            created_at,
            text: text.into(),
            engagement: EngagementCounts::default(),
            media: Vec::new(),
            link,
            is_reply: false,
            is_repost: false,
        }
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

impl PartialEq for NormalizedItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NormalizedItem {}

impl Hash for NormalizedItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Canonical public link for a post.
pub fn post_link(author: &str, id: &str) -> String {
    format!("https://x.com/{}/status/{}", author, id)
}
