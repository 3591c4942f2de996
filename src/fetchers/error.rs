//! Fetch failure taxonomy.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure classes the session controller recovers from differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CredentialExpired,
    Network,
    RateLimited,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CredentialExpired => "credential expired",
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::Unclassified => "unclassified",
        }
    }

    /// Classify an error that only carries text.
    ///
    /// Rate limiting is checked first since rate-limit messages often also
    /// mention the request or the connection.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if has(RATE_LIMIT_KEYWORDS) {
            ErrorKind::RateLimited
        } else if has(AUTH_KEYWORDS) {
            ErrorKind::CredentialExpired
        } else if has(NETWORK_KEYWORDS) {
            ErrorKind::Network
        } else {
            ErrorKind::Unclassified
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "slow down",
    "try again later",
    "throttle",
];

const AUTH_KEYWORDS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "authentication",
    "not authenticated",
    "401",
    "403",
    "login",
    "credential",
    "invalid cookie",
    "cookie expired",
    "token expired",
];

const NETWORK_KEYWORDS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "network",
    "unreachable",
    "temporary failure",
    "name resolution",
    "dns",
    "handshake",
    "broken pipe",
    "socket",
    "econnreset",
    "econnrefused",
    "etimedout",
    "no route to host",
    "temporarily unavailable",
];

/// Errors returned by a [`Fetcher`](super::Fetcher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("credential rejected: {0}")]
    CredentialExpired(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("backend error: {0}")]
    Unclassified(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::CredentialExpired(_) => ErrorKind::CredentialExpired,
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    /// Backend-supplied wait, when the backend gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Build an error of the class the message suggests.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorKind::from_message(&message) {
            ErrorKind::CredentialExpired => FetchError::CredentialExpired(message),
            ErrorKind::Network => FetchError::Network(message),
            ErrorKind::RateLimited => FetchError::RateLimited {
                message,
                retry_after: None,
            },
            ErrorKind::Unclassified => FetchError::Unclassified(message),
        }
    }

    /// Map a non-success HTTP status to an error class.
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), 200))
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                FetchError::CredentialExpired(detail)
            }
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
                message: detail,
                retry_after,
            },
            StatusCode::REQUEST_TIMEOUT => FetchError::Network(detail),
            s if s.is_server_error() => FetchError::Network(detail),
            _ => FetchError::Unclassified(detail),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            FetchError::Network(e.to_string())
        } else if e.is_decode() || e.is_body() {
            FetchError::Unclassified(format!("invalid response body: {}", e))
        } else {
            FetchError::from_message(e.to_string())
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    header_value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            FetchError::from_status(StatusCode::UNAUTHORIZED, None, "").kind(),
            ErrorKind::CredentialExpired
        );
        assert_eq!(
            FetchError::from_status(StatusCode::FORBIDDEN, None, "nope").kind(),
            ErrorKind::CredentialExpired
        );
        assert_eq!(
            FetchError::from_status(StatusCode::BAD_GATEWAY, None, "").kind(),
            ErrorKind::Network
        );
        assert_eq!(
            FetchError::from_status(StatusCode::NOT_FOUND, None, "").kind(),
            ErrorKind::Unclassified
        );

        let limited = FetchError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(900)),
            "slow down",
        );
        assert_eq!(limited.kind(), ErrorKind::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_message_classification() {
        assert_eq!(
            ErrorKind::from_message("429 Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::from_message("Unauthorized: bad authentication data"),
            ErrorKind::CredentialExpired
        );
        assert_eq!(
            ErrorKind::from_message("Connection reset by peer"),
            ErrorKind::Network
        );
        assert_eq!(
            ErrorKind::from_message("unexpected field in payload"),
            ErrorKind::Unclassified
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("120")), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(Some(" 5 ")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let err = FetchError::from_status(StatusCode::BAD_REQUEST, None, &body);
        assert!(err.to_string().len() < 260);
    }
}
