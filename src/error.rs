//! Error types for each seam of the collector.
//!
//! - [`FetchError`]: a single retrieval attempt failed for a reason other
//!   than "not found"
//! - [`SessionError`]: the browser session collaborator could not navigate,
//!   submit a form, or log in
//! - [`CollectError`]: anything that stops a provider; converted into a note
//!   at the provider boundary and never propagated further
//! - [`ConfigError`]: start-up configuration problems

use thiserror::Error;

/// A retrieval attempt that failed without a definite "not found".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed to save asset: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Classify a reqwest error for the given URL.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("no page loaded")]
    NoPage,

    #[error("form not found: {0}")]
    FormNotFound(String),

    #[error("login rejected (login form still present after submit)")]
    LoginRejected,

    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Http(err.to_string())
    }
}

/// Why a provider gave up. Rendered verbatim into the briefing notes.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The page listing the assets could not be retrieved.
    #[error("failed to fetch page: {0}")]
    Page(#[source] FetchError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("credentials not configured")]
    MissingCredentials,

    #[error("expected markup not found: {0}")]
    Markup(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages() {
        let e = FetchError::Timeout {
            url: "https://example.com/a.jpeg".to_string(),
        };
        assert_eq!(e.to_string(), "timed out fetching https://example.com/a.jpeg");

        let e = FetchError::Status {
            url: "https://example.com/a.jpeg".to_string(),
            status: 503,
        };
        assert_eq!(e.to_string(), "HTTP 503 from https://example.com/a.jpeg");
    }

    #[test]
    fn test_collect_error_is_transparent_over_fetch() {
        let e: CollectError = FetchError::Status {
            url: "https://example.com/page".to_string(),
            status: 404,
        }
        .into();
        assert_eq!(e.to_string(), "HTTP 404 from https://example.com/page");
    }

    #[test]
    fn test_session_error_wraps_into_collect_error() {
        let e: CollectError = SessionError::LoginRejected.into();
        assert!(e.to_string().contains("login rejected"));
    }
}
