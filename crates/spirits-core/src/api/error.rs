use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Access denied for {url}: {body}")]
    AccessDenied { url: String, body: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited while fetching {0}")]
    RateLimited(String),

    #[error("Server error from {url}: {body}")]
    ServerError { url: String, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to decode {url} as {kind}: {reason}")]
    Decode {
        url: String,
        kind: &'static str,
        reason: String,
    },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(url: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 | 403 => FetchError::AccessDenied {
                url: url.to_string(),
                body: truncated,
            },
            404 => FetchError::NotFound(url.to_string()),
            429 => FetchError::RateLimited(url.to_string()),
            500..=599 => FetchError::ServerError {
                url: url.to_string(),
                body: truncated,
            },
            _ => FetchError::InvalidResponse(format!("{} from {}: {}", status, url, truncated)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_maps_common_codes() {
        let url = "https://example.org/a.png";
        assert!(matches!(
            FetchError::from_status(url, StatusCode::NOT_FOUND, ""),
            FetchError::NotFound(u) if u == url
        ));
        assert!(matches!(
            FetchError::from_status(url, StatusCode::FORBIDDEN, "nope"),
            FetchError::AccessDenied { .. }
        ));
        assert!(matches!(
            FetchError::from_status(url, StatusCode::TOO_MANY_REQUESTS, ""),
            FetchError::RateLimited(_)
        ));
        assert!(matches!(
            FetchError::from_status(url, StatusCode::BAD_GATEWAY, "down"),
            FetchError::ServerError { .. }
        ));
        assert!(matches!(
            FetchError::from_status(url, StatusCode::IM_A_TEAPOT, ""),
            FetchError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = FetchError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated"));

        assert_eq!(FetchError::truncate_body("short"), "short");
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_BODY_LENGTH);
        // Must not panic on a multi-byte boundary
        let truncated = FetchError::truncate_body(&long);
        assert!(truncated.contains("truncated"));
    }
}
