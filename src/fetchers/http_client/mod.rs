//! HTTP client shared by the backends, paced by the request budget.

mod response;
mod user_agent;

pub use response::HttpResponse;
pub use user_agent::{resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use tracing::debug;

use super::error::FetchError;
use crate::rate_limiter::RateLimiter;

/// HTTP client bound to one backend's request budget.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    backend: String,
    rate_limiter: RateLimiter,
}

impl HttpClient {
    /// Create a client for `backend`.
    ///
    /// `user_agent_config` follows [`resolve_user_agent`].
    pub fn new(
        backend: &str,
        timeout: Duration,
        user_agent_config: Option<&str>,
        rate_limiter: RateLimiter,
    ) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Unclassified(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            backend: backend.to_string(),
            rate_limiter,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Wait for the budget, send, and report the outcome back to the budget.
    pub async fn send(&self, request: RequestBuilder) -> Result<HttpResponse, FetchError> {
        self.rate_limiter.acquire(&self.backend).await;

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_timeout() || e.is_connect() {
                    self.rate_limiter.report_server_error(&self.backend).await;
                }
                return Err(e.into());
            }
        };

        let status = response.status();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        debug!("{} {} -> {}", self.backend, response.url(), status.as_u16());

        let http = HttpResponse {
            status,
            headers,
            response,
        };

        if status.as_u16() == 429 {
            self.rate_limiter
                .report_rate_limit(&self.backend, http.retry_after())
                .await;
        } else if status.is_server_error() {
            self.rate_limiter.report_server_error(&self.backend).await;
        } else if status.is_success() {
            self.rate_limiter.report_success(&self.backend).await;
        }

        Ok(http)
    }
}
