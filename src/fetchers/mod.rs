//! Retrieval backends behind one query/cursor interface.

pub mod api;
mod error;
mod http_client;
mod normalize;
mod search;
pub mod web;

pub use api::{
    estimate_cost, estimate_posts, format_cost, ApiFetcher, ApiFetcherConfig,
    DEFAULT_API_BASE_URL, MAX_ITEMS_PER_REQUEST, PRICE_PER_THOUSAND,
};
pub use error::{parse_retry_after, ErrorKind, FetchError};
pub use http_client::{resolve_user_agent, HttpClient, HttpResponse, USER_AGENT};
pub use normalize::{extract_cursor, extract_items, extract_single, normalize_item, parse_timestamp};
pub use search::build_search_query;
pub use web::{
    load_cookie_file, WebFetcher, WebFetcherConfig, DEFAULT_WEB_BASE_URL, DEFAULT_WEB_PAGE_SIZE,
};

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;
use crate::models::{BackendKind, NormalizedItem, ScrapeQuery};
use crate::rate_limiter::RateLimiter;

/// Links looked up per batch in link mode.
pub const LINK_BATCH_SIZE: usize = 20;

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub items: Vec<NormalizedItem>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Secret a backend authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Cookies(BTreeMap<String, String>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::Cookies(c) => write!(f, "Cookies({} entries)", c.len()),
        }
    }
}

/// A retrieval backend.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Backend name, also the request budget key.
    fn name(&self) -> &str;

    /// Fetch the page starting at `cursor` (`None` = beginning).
    async fn fetch_batch(
        &self,
        query: &ScrapeQuery,
        cursor: Option<&str>,
    ) -> Result<FetchedBatch, FetchError>;

    /// Replace the credential used by subsequent requests.
    async fn update_credential(&self, credential: Credential) -> Result<(), FetchError>;
}

/// Build the fetcher for `kind` from settings, sharing `rate_limiter`.
pub fn build_fetcher(
    kind: BackendKind,
    settings: &Settings,
    rate_limiter: RateLimiter,
) -> Result<Arc<dyn Fetcher>, FetchError> {
    let fetcher: Arc<dyn Fetcher> = match kind {
        BackendKind::Api => Arc::new(ApiFetcher::new(settings.api_fetcher_config(), rate_limiter)?),
        BackendKind::Web => Arc::new(WebFetcher::new(settings.web_fetcher_config()?, rate_limiter)?),
    };
    Ok(fetcher)
}

/// Slice of link-mode ids covered by `cursor`, plus the cursor after it.
///
/// Link-mode cursors are the decimal offset of the next id to look up.
pub(crate) fn link_page(
    total: usize,
    cursor: Option<&str>,
    batch_size: usize,
) -> Result<(Range<usize>, Option<String>), FetchError> {
    let start = match cursor {
        None => 0,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| FetchError::Unclassified(format!("invalid link cursor '{}'", raw)))?,
    };
    let start = start.min(total);
    let end = (start + batch_size.max(1)).min(total);
    let next = (end < total).then(|| end.to_string());
    Ok((start..end, next))
}
