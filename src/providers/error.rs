use std::fmt;

/// Classified provider error — tells the caller *why* the LLM call failed
/// so it can pick the right recovery strategy.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from 429 Retry-After header or body).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 429 — rate limited; check retry_after_secs.
    RateLimit,
    /// 404 or "model not found" — bad model name.
    NotFound,
    /// 408, request timeout, or provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 5xx — provider-side outage.
    ServerError,
    /// 2xx whose body violates the chat contract (no text, no tool calls,
    /// or unparseable JSON).
    Contract,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 402 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        let retry_after_secs = if kind == ProviderErrorKind::RateLimit {
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
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Contract,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Short user-facing summary suitable for sending back as a chat reply.
    pub fn user_message(&self) -> String {
        match self.kind {
            ProviderErrorKind::Auth => {
                "The model provider rejected my credentials. Check the API key in config.json."
                    .to_string()
            }
            ProviderErrorKind::RateLimit => match self.retry_after_secs {
                Some(secs) => format!("The model is rate-limiting me; try again in about {}s.", secs),
                None => "The model is rate-limiting me right now.".to_string(),
            },
            ProviderErrorKind::NotFound => {
                "The configured model name wasn't found at the provider.".to_string()
            }
            ProviderErrorKind::Timeout => "The model took too long to answer.".to_string(),
            ProviderErrorKind::Network => "I couldn't reach the model (network error).".to_string(),
            ProviderErrorKind::ServerError => {
                "The model provider is having issues (server error).".to_string()
            }
            ProviderErrorKind::Contract => {
                "The model returned a reply I couldn't make sense of.".to_string()
            }
            ProviderErrorKind::Unknown => format!("Model error: {}", self.message),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(
                f,
                "Provider error ({}, {:?}): {}",
                status, self.kind, self.message
            )
        } else {
            write!(f, "Provider error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

/// Try to parse retry_after from a JSON response body.
/// Handles `{"error": {"retry_after": 5}}` and `{"retry_after": 5}`.
fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v["error"]["retry_after"]
        .as_u64()
        .or_else(|| v["retry_after"].as_u64())
}

fn truncate_body(body: &str) -> String {
    let mut end = body.len().min(300);
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    if end < body.len() {
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            ProviderError::from_status(401, "").kind,
            ProviderErrorKind::Auth
        );
        assert_eq!(
            ProviderError::from_status(429, "").kind,
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::from_status(404, "").kind,
            ProviderErrorKind::NotFound
        );
        assert_eq!(
            ProviderError::from_status(503, "").kind,
            ProviderErrorKind::ServerError
        );
        assert_eq!(
            ProviderError::from_status(418, "").kind,
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn retry_after_extracted_from_body() {
        let err = ProviderError::from_status(429, r#"{"error":{"retry_after":7}}"#);
        assert_eq!(err.retry_after_secs, Some(7));
        let err = ProviderError::from_status(429, r#"{"retry_after":3}"#);
        assert_eq!(err.retry_after_secs, Some(3));
    }

    #[test]
    fn long_bodies_truncate_on_char_boundary() {
        let body = "é".repeat(400);
        let err = ProviderError::from_status(500, &body);
        assert!(err.message.ends_with("..."));
        assert!(err.message.len() <= 304);
    }

    #[test]
    fn contract_errors_have_user_message() {
        let err = ProviderError::contract("empty reply");
        assert_eq!(err.kind, ProviderErrorKind::Contract);
        assert!(!err.user_message().is_empty());
    }
}
