use serde::Deserialize;

/// Errors from the Dispatch Protocol client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The orchestrator answered with a non-2xx status.
    #[error("Dispatch API error ({status} {code}): {message}")]
    Api {
        status: u16,
        /// Machine-readable code from the error body, e.g. `UNSCHEDULABLE_TAGS`.
        code: String,
        message: String,
        /// Unmet tags, only set for `UNSCHEDULABLE_TAGS`.
        tags: Vec<String>,
    },

    /// A response body did not have the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The base URL cannot carry request paths.
    #[error("Invalid orchestrator URL: {0}")]
    InvalidUrl(String),
}

/// JSON error body produced by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl ClientError {
    /// Build an [`ClientError::Api`] from a status and raw body.
    ///
    /// Bodies that are not the server's JSON error shape (e.g. from a proxy)
    /// keep their text as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => ClientError::Api {
                status,
                code: parsed.code,
                message: parsed.error,
                tags: parsed.tags,
            },
            Err(_) => ClientError::Api {
                status,
                code: format!("HTTP_{status}"),
                message: body.to_string(),
                tags: Vec::new(),
            },
        }
    }

    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Request(err) => err.status().map(|s| s.as_u16()),
            ClientError::Decode(_) | ClientError::InvalidUrl(_) => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Transport failures and server-side errors may succeed on retry;
    /// 4xx answers and malformed bodies never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(err) => !err.is_decode() && !err.is_builder(),
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::Decode(_) | ClientError::InvalidUrl(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_server_error_body() {
        let body = r#"{"error":"Jobs with unprocessable tags: {\"rig9\"}","code":"UNSCHEDULABLE_TAGS","tags":["rig9"]}"#;
        let err = ClientError::from_response(422, body);
        assert_matches!(
            &err,
            ClientError::Api { status: 422, code, tags, .. }
                if code == "UNSCHEDULABLE_TAGS" && tags == &vec!["rig9".to_string()]
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn plain_text_body_is_kept() {
        let err = ClientError::from_response(502, "Bad Gateway");
        assert_eq!(err.code(), Some("HTTP_502"));
        assert!(err.to_string().contains("Bad Gateway"));
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_errors_are_not_retried() {
        assert!(!ClientError::Decode("missing field".into()).is_retryable());
    }
}
