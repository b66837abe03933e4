//! The retrieval capability used by providers and the probe search.
//!
//! A retrieval attempt has three outcomes:
//! - [`Retrieval::Found`]: bytes were obtained with a success status
//! - [`Retrieval::NotFound`]: the resource is absent (HTTP 404); a normal miss
//! - `Err(FetchError)`: anything else (timeout, connection error, other
//!   error status)
//!
//! [`HttpFetcher`] is the reqwest-backed implementation. Authenticated
//! sources get an `HttpFetcher` whose cookie jar was seeded from a browser
//! session (see [`HttpFetcher::with_cookies`]).

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Outcome of one retrieval attempt that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    Found {
        bytes: Vec<u8>,
        /// Media type without parameters, e.g. `image/png`.
        content_type: Option<String>,
        /// URL after redirects.
        final_url: String,
    },
    NotFound,
}

impl Retrieval {
    /// Treat a miss as an error for resources that are expected to exist.
    pub fn require(self, url: &str) -> Result<FoundAsset, FetchError> {
        match self {
            Retrieval::Found {
                bytes,
                content_type,
                final_url,
            } => Ok(FoundAsset {
                bytes,
                content_type,
                final_url,
            }),
            Retrieval::NotFound => Err(FetchError::Status {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            }),
        }
    }
}

/// The payload of a [`Retrieval::Found`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: String,
}

/// Anything that can attempt to retrieve a URL.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Retrieval, FetchError>;
}

/// reqwest-backed [`Fetch`] with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Build a fetcher that presents the given session cookies to `base`.
    pub fn with_cookies(
        cookies: &[(String, String)],
        base: &Url,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let jar = Jar::default();
        for (name, value) in cookies {
            jar.add_cookie_str(&format!("{name}={value}"), base);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .cookie_provider(Arc::new(jar))
            .build()
            .map_err(|e| FetchError::Transport {
                url: base.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        debug!(count = cookies.len(), base = %base, "Seeded cookie jar from session");
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<Retrieval, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Retrieval::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type);
        let final_url = resp.url().to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        debug!(bytes = bytes.len(), ?content_type, "Retrieved");
        Ok(Retrieval::Found {
            bytes: bytes.to_vec(),
            content_type,
            final_url,
        })
    }
}

/// Strip parameters from a `Content-Type` header value.
///
/// `"image/png; charset=binary"` becomes `"image/png"`; an empty media type
/// yields `None`.
pub fn media_type(header: &str) -> Option<String> {
    let mt = header.split(';').next().unwrap_or_default().trim();
    if mt.is_empty() {
        None
    } else {
        Some(mt.to_ascii_lowercase())
    }
}

/// Pick a file extension from the content type, then the URL, then `fallback`.
pub fn extension_for(url: &str, content_type: Option<&str>, fallback: &str) -> String {
    match content_type {
        Some("image/png") => return ".png".to_string(),
        Some("image/jpeg") => return ".jpg".to_string(),
        Some("image/gif") => return ".gif".to_string(),
        Some("image/webp") => return ".webp".to_string(),
        _ => {}
    }
    let lower = url.to_ascii_lowercase();
    for ext in [".png", ".jpg", ".jpeg", ".gif", ".webp"] {
        if lower.contains(ext) {
            return if ext == ".jpeg" { ".jpg" } else { ext }.to_string();
        }
    }
    fallback.to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_strips_parameters() {
        assert_eq!(media_type("image/png; charset=binary"), Some("image/png".to_string()));
        assert_eq!(media_type("  IMAGE/JPEG "), Some("image/jpeg".to_string()));
        assert_eq!(media_type(""), None);
        assert_eq!(media_type(";q=1"), None);
    }

    #[test]
    fn test_extension_prefers_content_type() {
        assert_eq!(extension_for("https://x/y.gif", Some("image/png"), ".bin"), ".png");
        assert_eq!(extension_for("https://x/y", Some("image/webp"), ".bin"), ".webp");
    }

    #[test]
    fn test_extension_falls_back_to_url_then_default() {
        assert_eq!(extension_for("https://x/Chart.JPEG?v=2", None, ".bin"), ".jpg");
        assert_eq!(extension_for("https://x/chart.gif", Some("text/html"), ".bin"), ".gif");
        assert_eq!(extension_for("https://x/chart", None, ".gif"), ".gif");
    }

    #[test]
    fn test_require_turns_miss_into_404() {
        let err = Retrieval::NotFound.require("https://x/page").unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));

        let found = Retrieval::Found {
            bytes: b"abc".to_vec(),
            content_type: None,
            final_url: "https://x/page".to_string(),
        }
        .require("https://x/page")
        .unwrap();
        assert_eq!(found.bytes, b"abc");
    }
}
