use std::fmt;

/// Classified task-store error — tells the caller *why* the store call failed
/// so it can pick the right recovery strategy (retry, surface, or degrade).
#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from 429 Retry-After header or body).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// 401/403 — bad API key or integration permissions.
    Auth,
    /// 429 — rate limited; check retry_after_secs.
    RateLimit,
    /// 404 or object_not_found — the record id does not exist.
    NotFound,
    /// 400 — the store rejected the payload.
    Validation,
    /// Request timeout or the store took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — store-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl StoreError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 => StoreErrorKind::Validation,
            401 | 403 => StoreErrorKind::Auth,
            404 => StoreErrorKind::NotFound,
            408 => StoreErrorKind::Timeout,
            429 => StoreErrorKind::RateLimit,
            500 | 502 | 503 | 504 => StoreErrorKind::ServerError,
            _ => StoreErrorKind::Unknown,
        };

        let retry_after_secs = if kind == StoreErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            StoreErrorKind::Timeout
        } else {
            StoreErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// Constructed directly by in-memory test stores; the HTTP client maps
    /// 404s through `from_status`.
    #[allow(dead_code)]
    pub fn not_found(id: &str) -> Self {
        Self {
            kind: StoreErrorKind::NotFound,
            status: None,
            message: format!("record not found: {}", id),
            retry_after_secs: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Unknown,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Whether this error is worth retrying with the same request.
    /// Not-found and validation rejections are permanent and never retried.
    #[allow(dead_code)]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::RateLimit
                | StoreErrorKind::Timeout
                | StoreErrorKind::Network
                | StoreErrorKind::ServerError
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "Store error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "Store error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for StoreError {}

/// Try to parse retry_after from a JSON error body.
/// Handles: {"error": {"retry_after": 5}} and {"retry_after": 5}
fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v["error"]["retry_after"]
        .as_u64()
        .or_else(|| v["retry_after"].as_u64())
        .or_else(|| {
            v["error"]["retry_after"]
                .as_f64()
                .or_else(|| v["retry_after"].as_f64())
                .map(|f| f.ceil() as u64)
        })
}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        format!("{}...", &body[..300])
    } else {
        body.to_string()
    }
}
