//! Paid JSON API backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::http_client::HttpClient;
use super::normalize::{extract_cursor, extract_items, extract_single, normalize_item};
use super::search::build_search_query;
use super::{link_page, Credential, FetchError, FetchedBatch, Fetcher, LINK_BATCH_SIZE};
use crate::models::{QueryMode, ScrapeQuery};
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_API_BASE_URL: &str = "https://api.twexapi.io";
pub const MAX_ITEMS_PER_REQUEST: u32 = 100;

/// Connection settings for the paid API.
#[derive(Debug, Clone)]
pub struct ApiFetcherConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub page_size: u32,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ApiFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            page_size: MAX_ITEMS_PER_REQUEST,
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Advertised price in US dollars per thousand posts returned.
pub const PRICE_PER_THOUSAND: f64 = 0.14;

/// Posts per account per day assumed when nothing better is known.
const ASSUMED_POSTS_PER_DAY: u64 = 10;

/// Dollar cost of `posts` returned by the API.
pub fn estimate_cost(posts: u64) -> f64 {
    posts as f64 * PRICE_PER_THOUSAND / 1000.0
}

pub fn format_cost(cost: f64) -> String {
    if cost == 0.0 {
        "Free".to_string()
    } else if cost < 0.01 {
        format!("${:.4}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

/// Rough number of posts a query will return, for a cost estimate before
/// it runs. `None` when an open window leaves no basis for a guess.
pub fn estimate_posts(query: &ScrapeQuery) -> Option<u64> {
    if query.mode == QueryMode::Links {
        return Some(query.targets.len() as u64);
    }
    let (start, end) = (query.window.start?, query.window.end?);
    let days = (end.date() - start.date()).num_days() as u64 + 1;
    let sources = match query.mode {
        QueryMode::Identity => query.targets.len() as u64,
        _ => 1,
    };
    Some(days * sources * ASSUMED_POSTS_PER_DAY)
}

/// Fetcher for the paid advanced-search API, authenticated with a bearer key.
pub struct ApiFetcher {
    http: HttpClient,
    base_url: String,
    api_key: RwLock<Option<String>>,
    page_size: u32,
}

impl ApiFetcher {
    pub const NAME: &'static str = "api";

    pub fn new(config: ApiFetcherConfig, rate_limiter: RateLimiter) -> Result<Self, FetchError> {
        let http = HttpClient::new(
            Self::NAME,
            config.timeout,
            config.user_agent.as_deref(),
            rate_limiter,
        )?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: RwLock::new(config.api_key.filter(|k| !k.trim().is_empty())),
            page_size: config.page_size.clamp(1, MAX_ITEMS_PER_REQUEST),
        })
    }

    async fn key(&self) -> Result<String, FetchError> {
        self.api_key
            .read()
            .await
            .clone()
            .ok_or_else(|| FetchError::CredentialExpired("no API key configured".to_string()))
    }

    async fn search(
        &self,
        query: &ScrapeQuery,
        cursor: Option<&str>,
    ) -> Result<FetchedBatch, FetchError> {
        let key = self.key().await?;
        let search = build_search_query(query);

        let mut body = json!({
            "searchTerms": [search],
            "maxItems": self.page_size,
            "sortBy": "Latest",
        });
        if let Some(cursor) = cursor {
            body["cursor"] = json!(cursor);
        }

        let url = format!("{}/twitter/advanced_search", self.base_url);
        let request = self.http.client().post(&url).bearer_auth(&key).json(&body);
        let payload = self.http.send(request).await?.json().await?;

        let fetched_at = Utc::now();
        let raw = extract_items(&payload);
        let items: Vec<_> = raw
            .iter()
            .filter_map(|r| normalize_item(r, fetched_at))
            .collect();

        // A backend echoing the cursor back has nothing further.
        let next_cursor = extract_cursor(&payload).filter(|next| Some(next.as_str()) != cursor);
        debug!(
            "API search '{}' returned {} raw item(s), next cursor {:?}",
            search,
            raw.len(),
            next_cursor
        );

        Ok(FetchedBatch {
            items,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    async fn lookup(
        &self,
        query: &ScrapeQuery,
        cursor: Option<&str>,
    ) -> Result<FetchedBatch, FetchError> {
        let key = self.key().await?;
        let ids = query.post_ids();
        let (range, next_cursor) = link_page(ids.len(), cursor, LINK_BATCH_SIZE)?;

        let mut items = Vec::new();
        for id in &ids[range] {
            let url = format!("{}/twitter/tweets/{}", self.base_url, id);
            let response = self
                .http
                .send(self.http.client().get(&url).bearer_auth(&key))
                .await?;
            if response.status == StatusCode::NOT_FOUND {
                warn!("Post {} is unavailable, skipping", id);
                continue;
            }
            let payload = response.json().await?;
            match extract_single(&payload).and_then(|raw| normalize_item(raw, Utc::now())) {
                Some(item) => items.push(item),
                None => warn!("No post data returned for {}", id),
            }
        }

        Ok(FetchedBatch {
            items,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }
}

#[async_trait]
impl Fetcher for ApiFetcher {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_batch(
        &self,
        query: &ScrapeQuery,
        cursor: Option<&str>,
    ) -> Result<FetchedBatch, FetchError> {
        match query.mode {
            QueryMode::Links => self.lookup(query, cursor).await,
            QueryMode::Identity | QueryMode::Keywords => self.search(query, cursor).await,
        }
    }

    async fn update_credential(&self, credential: Credential) -> Result<(), FetchError> {
        match credential {
            Credential::ApiKey(key) if !key.trim().is_empty() => {
                *self.api_key.write().await = Some(key.trim().to_string());
                Ok(())
            }
            Credential::ApiKey(_) => Err(FetchError::CredentialExpired(
                "empty API key".to_string(),
            )),
            Credential::Cookies(_) => Err(FetchError::Unclassified(
                "the API backend needs an API key, not cookies".to_string(),
            )),
        }
    }
}
