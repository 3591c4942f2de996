//! Cookie-authenticated web backend.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::http_client::HttpClient;
use super::normalize::{extract_cursor, extract_items, extract_single, normalize_item};
use super::search::build_search_query;
use super::{link_page, Credential, FetchError, FetchedBatch, Fetcher, LINK_BATCH_SIZE};
use crate::models::{QueryMode, ScrapeQuery};
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_WEB_BASE_URL: &str = "https://x.com";
pub const DEFAULT_WEB_PAGE_SIZE: u32 = 20;

/// Cookies the web backend cannot authenticate without.
const REQUIRED_COOKIES: &[&str] = &["auth_token", "ct0"];

/// Connection settings for the web backend.
#[derive(Debug, Clone)]
pub struct WebFetcherConfig {
    pub base_url: String,
    pub cookies: BTreeMap<String, String>,
    pub page_size: u32,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for WebFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WEB_BASE_URL.to_string(),
            cookies: BTreeMap::new(),
            page_size: DEFAULT_WEB_PAGE_SIZE,
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Read a cookie file.
///
/// Accepts a JSON object mapping names to values, or a JSON array of
/// `{name, value}` entries. When a name repeats, the last entry wins.
pub fn load_cookie_file(path: &Path) -> Result<BTreeMap<String, String>, FetchError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FetchError::CredentialExpired(format!(
            "cannot read cookie file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_cookies(&content).map_err(|reason| {
        FetchError::CredentialExpired(format!("invalid cookie file {}: {}", path.display(), reason))
    })
}

fn parse_cookies(content: &str) -> Result<BTreeMap<String, String>, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let mut cookies = BTreeMap::new();

    match value {
        Value::Object(map) => {
            for (name, value) in map {
                if let Some(v) = value.as_str() {
                    cookies.insert(name, v.to_string());
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let name = entry.get("name").and_then(Value::as_str);
                let value = entry.get("value").and_then(Value::as_str);
                if let (Some(name), Some(value)) = (name, value) {
                    if cookies.insert(name.to_string(), value.to_string()).is_some() {
                        debug!("Duplicate cookie '{}', keeping the last one", name);
                    }
                }
            }
        }
        _ => return Err("expected a JSON object or array".to_string()),
    }

    if cookies.is_empty() {
        return Err("no cookies found".to_string());
    }
    Ok(cookies)
}

/// Fetcher for the web backend, authenticated with session cookies.
pub struct WebFetcher {
    http: HttpClient,
    base_url: String,
    cookies: RwLock<BTreeMap<String, String>>,
    page_size: u32,
}

impl WebFetcher {
    pub const NAME: &'static str = "web";

    pub fn new(config: WebFetcherConfig, rate_limiter: RateLimiter) -> Result<Self, FetchError> {
        let http = HttpClient::new(
            Self::NAME,
            config.timeout,
            config.user_agent.as_deref(),
            rate_limiter,
        )?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cookies: RwLock::new(config.cookies),
            page_size: config.page_size.max(1),
        })
    }

    /// Attach the cookie header and CSRF token.
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, FetchError> {
        let cookies = self.cookies.read().await;
        if let Some(missing) = REQUIRED_COOKIES.iter().find(|c| !cookies.contains_key(**c)) {
            return Err(FetchError::CredentialExpired(format!(
                "cookie '{}' is missing",
                missing
            )));
        }
        let header = cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        let csrf = cookies.get("ct0").cloned().unwrap_or_default();
        Ok(request.header("cookie", header).header("x-csrf-token", csrf))
    }

    async fn search(
        &self,
        query: &ScrapeQuery,
        cursor: Option<&str>,
    ) -> Result<FetchedBatch, FetchError> {
        let search = build_search_query(query);
        let url = format!("{}/i/api/search", self.base_url);

        let mut params = vec![
            ("q", search.clone()),
            ("count", self.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let request = self
            .authorize(self.http.client().get(&url).query(&params))
            .await?;
        let payload = self.http.send(request).await?.json().await?;

        let fetched_at = Utc::now();
        let raw = extract_items(&payload);
        let items: Vec<_> = raw
            .iter()
            .filter_map(|r| normalize_item(r, fetched_at))
            .collect();
        let next_cursor = extract_cursor(&payload).filter(|next| Some(next.as_str()) != cursor);
        debug!(
            "Web search '{}' returned {} raw item(s), next cursor {:?}",
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
        let ids = query.post_ids();
        let (range, next_cursor) = link_page(ids.len(), cursor, LINK_BATCH_SIZE)?;

        let mut items = Vec::new();
        for id in &ids[range] {
            let url = format!("{}/i/api/tweet/{}", self.base_url, id);
            let request = self.authorize(self.http.client().get(&url)).await?;
            let response = self.http.send(request).await?;
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
impl Fetcher for WebFetcher {
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
            Credential::Cookies(cookies) if !cookies.is_empty() => {
                *self.cookies.write().await = cookies;
                Ok(())
            }
            Credential::Cookies(_) => Err(FetchError::CredentialExpired(
                "empty cookie set".to_string(),
            )),
            Credential::ApiKey(_) => Err(FetchError::Unclassified(
                "the web backend needs cookies, not an API key".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::ErrorKind;
    use crate::rate_limiter::RateLimitConfig;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cookies() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("auth_token".to_string(), "tok".to_string()),
            ("ct0".to_string(), "csrf1".to_string()),
        ])
    }

    fn fetcher(server: &MockServer, cookies: BTreeMap<String, String>) -> WebFetcher {
        let config = WebFetcherConfig {
            base_url: server.uri(),
            cookies,
            ..Default::default()
        };
        let limiter = RateLimiter::with_config(RateLimitConfig::with_base_delay(Duration::ZERO));
        WebFetcher::new(config, limiter).unwrap()
    }

    #[test]
    fn test_parse_cookie_object_and_array() {
        let map = parse_cookies(r#"{"auth_token": "a", "ct0": "b"}"#).unwrap();
        assert_eq!(map.get("ct0").map(String::as_str), Some("b"));

        let list = parse_cookies(
            r#"[{"name": "ct0", "value": "old"}, {"name": "ct0", "value": "new"}, {"name": "auth_token", "value": "t"}]"#,
        )
        .unwrap();
        assert_eq!(list.get("ct0").map(String::as_str), Some("new"));
        assert_eq!(list.len(), 2);

        assert!(parse_cookies("[]").is_err());
        assert!(parse_cookies("\"ct0\"").is_err());
    }

    #[test]
    fn test_load_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cookies.json");
        std::fs::write(&file, r#"{"auth_token": "a", "ct0": "b"}"#).unwrap();
        assert_eq!(load_cookie_file(&file).unwrap().len(), 2);

        let err = load_cookie_file(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialExpired);
    }

    #[tokio::test]
    async fn test_search_sends_cookies_and_csrf() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/i/api/search"))
            .and(query_param("q", "(\"rust\")"))
            .and(query_param("cursor", "abc"))
            .and(header("x-csrf-token", "csrf1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tweets": [{"id_str": "5", "screen_name": "eve", "full_text": "rust!"}],
                "cursor": "def"
            })))
            .mount(&server)
            .await;

        let query = ScrapeQuery::new(QueryMode::Keywords, ["rust"]).unwrap();
        let batch = fetcher(&server, cookies())
            .fetch_batch(&query, Some("abc"))
            .await
            .unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.next_cursor.as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn test_missing_cookies_and_forbidden_are_credential_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let query = ScrapeQuery::new(QueryMode::Identity, ["eve"]).unwrap();

        let err = fetcher(&server, BTreeMap::new())
            .fetch_batch(&query, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialExpired);

        let err = fetcher(&server, cookies())
            .fetch_batch(&query, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialExpired);
    }

    #[tokio::test]
    async fn test_server_errors_are_network_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let query = ScrapeQuery::new(QueryMode::Identity, ["eve"]).unwrap();
        let err = fetcher(&server, cookies())
            .fetch_batch(&query, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_update_credential_rejects_api_key() {
        let server = MockServer::start().await;
        let fetcher = fetcher(&server, cookies());
        assert!(fetcher
            .update_credential(Credential::ApiKey("k".to_string()))
            .await
            .is_err());
        assert!(fetcher
            .update_credential(Credential::Cookies(cookies()))
            .await
            .is_ok());
    }
}
