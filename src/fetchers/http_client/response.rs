//! HTTP response wrapper.

use std::collections::HashMap;

use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::fetchers::error::{parse_retry_after, FetchError};

/// Response with its headers captured before the body is consumed.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub(crate) response: Response,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Seconds from the `Retry-After` header, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        parse_retry_after(self.headers.get("retry-after").map(|s| s.as_str()))
    }

    /// Decode a JSON body, turning error statuses into classified errors.
    pub async fn json(self) -> Result<Value, FetchError> {
        if !self.is_success() {
            return Err(self.into_error().await);
        }
        let text = self.response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| FetchError::Unclassified(format!("invalid JSON response: {}", e)))
    }

    /// Consume an error response into a classified error.
    pub async fn into_error(self) -> FetchError {
        let retry_after = self.retry_after();
        let body = self.response.text().await.unwrap_or_default();
        FetchError::from_status(self.status, retry_after, &body)
    }
}
