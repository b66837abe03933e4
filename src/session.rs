//! Browser session capability for sources behind a login.
//!
//! Providers that need an authenticated session talk to a [`BrowserSession`]
//! and never to a specific automation technology. The session's only output
//! the rest of the crate relies on is its cookies, which a
//! [`SessionBackend`] turns into a cookie-bearing [`Fetch`].
//!
//! [`HttpSession`] is the built-in implementation: a reqwest client with a
//! cookie store that renders pages as static HTML and queries them with
//! `scraper`. Locators are CSS selectors.

use crate::error::SessionError;
use crate::fetch::{Fetch, HttpFetcher};
use async_trait::async_trait;
use rand::{rng, Rng};
use reqwest::cookie::{CookieStore, Jar};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Login credentials, supplied at runtime and never defaulted.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both parts present, or nothing.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Self::new(u, p)),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options for opening a session.
///
/// A non-headless session is a debugging aid: providers keep a copy of each
/// page it renders under `debug/`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub timeout: Duration,
    pub user_agent: String,
}

/// Snapshot of one element found on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageElement {
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

impl PageElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    fn current_url(&self) -> Option<String>;

    fn find(&self, locator: &str) -> Option<PageElement> {
        self.find_all(locator).into_iter().next()
    }

    fn find_all(&self, locator: &str) -> Vec<PageElement>;

    fn extract_text(&self, element: &PageElement) -> String {
        element.text.trim().to_string()
    }

    /// Submit the first form matching `locator`, overlaying `fields` on its
    /// pre-filled inputs.
    async fn submit_form(
        &mut self,
        locator: &str,
        fields: &[(String, String)],
    ) -> Result<(), SessionError>;

    fn page_source(&self) -> Option<String>;

    fn cookies(&self) -> Vec<(String, String)>;

    /// Release the session. Must be safe to call on any path.
    async fn quit(&mut self);
}

/// Opens sessions and turns their cookies into a retrieval capability.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionError>;

    fn fetcher(
        &self,
        cookies: &[(String, String)],
        base: &Url,
        config: &SessionConfig,
    ) -> Result<Arc<dyn Fetch>, SessionError>;
}

/// Backend producing [`HttpSession`]s and reqwest fetchers.
#[derive(Debug, Default, Clone)]
pub struct HttpSessionBackend;

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionError> {
        Ok(Box::new(HttpSession::new(config)?))
    }

    fn fetcher(
        &self,
        cookies: &[(String, String)],
        base: &Url,
        config: &SessionConfig,
    ) -> Result<Arc<dyn Fetch>, SessionError> {
        let fetcher = HttpFetcher::with_cookies(cookies, base, config.timeout, &config.user_agent)
            .map_err(|e| SessionError::Http(e.to_string()))?;
        Ok(Arc::new(fetcher))
    }
}

/// A cookie-keeping HTTP client that behaves like a minimal browser tab.
pub struct HttpSession {
    client: reqwest::Client,
    jar: Arc<Jar>,
    page: Option<(Url, String)>,
}

impl HttpSession {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        Ok(Self {
            client,
            jar,
            page: None,
        })
    }

    async fn load(&mut self, request: reqwest::RequestBuilder, url: &str) -> Result<(), SessionError> {
        let resp = request.send().await.map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        let final_url = resp.url().clone();
        let body = resp.text().await.map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(url = %final_url, bytes = body.len(), "Page loaded");
        self.page = Some((final_url, body));
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let request = self.client.get(url);
        self.load(request, url).await
    }

    fn current_url(&self) -> Option<String> {
        self.page.as_ref().map(|(u, _)| u.to_string())
    }

    fn find_all(&self, locator: &str) -> Vec<PageElement> {
        match &self.page {
            Some((_, html)) => select_elements(html, locator),
            None => Vec::new(),
        }
    }

    #[instrument(level = "debug", skip(self, fields))]
    async fn submit_form(
        &mut self,
        locator: &str,
        fields: &[(String, String)],
    ) -> Result<(), SessionError> {
        let (base, html) = self.page.as_ref().ok_or(SessionError::NoPage)?;
        let form = parse_form(html, base, locator)?;
        let params = form.with_fields(fields);
        let action = form.action.to_string();

        let request = if form.method == "post" {
            self.client.post(form.action).form(&params)
        } else {
            self.client.get(form.action).query(&params)
        };
        self.load(request, &action).await
    }

    fn page_source(&self) -> Option<String> {
        self.page.as_ref().map(|(_, html)| html.clone())
    }

    fn cookies(&self) -> Vec<(String, String)> {
        let Some((url, _)) = &self.page else {
            return Vec::new();
        };
        self.jar
            .cookies(url)
            .and_then(|h| h.to_str().ok().map(parse_cookie_header))
            .unwrap_or_default()
    }

    async fn quit(&mut self) {
        self.page = None;
        debug!("HTTP session closed");
    }
}

/// Elements matching a CSS selector in `html`. An invalid selector matches
/// nothing.
pub(crate) fn select_elements(html: &str, locator: &str) -> Vec<PageElement> {
    let selector = match Selector::parse(locator) {
        Ok(s) => s,
        Err(e) => {
            warn!(%locator, error = %e, "Invalid selector");
            return Vec::new();
        }
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .map(|el| PageElement {
            tag: el.value().name().to_string(),
            text: el.text().collect::<Vec<_>>().join(" "),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect()
}

/// A form ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormTarget {
    pub action: Url,
    pub method: String,
    pub inputs: Vec<(String, String)>,
}

impl FormTarget {
    /// Pre-filled inputs with `fields` replacing same-named ones.
    pub fn with_fields(&self, fields: &[(String, String)]) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .inputs
            .iter()
            .filter(|(name, _)| !fields.iter().any(|(f, _)| f == name))
            .cloned()
            .collect();
        params.extend(fields.iter().cloned());
        params
    }
}

pub(crate) fn parse_form(html: &str, base: &Url, locator: &str) -> Result<FormTarget, SessionError> {
    let not_found = || SessionError::FormNotFound(locator.to_string());
    let form_selector = Selector::parse(locator).map_err(|_| not_found())?;
    let input_selector = Selector::parse("input[name]").map_err(|_| not_found())?;

    let document = Html::parse_document(html);
    let form = document.select(&form_selector).next().ok_or_else(not_found)?;

    let action = match form.value().attr("action") {
        Some(a) if !a.trim().is_empty() => base.join(a.trim()).map_err(|e| SessionError::Navigation {
            url: a.to_string(),
            reason: e.to_string(),
        })?,
        _ => base.clone(),
    };
    let method = form
        .value()
        .attr("method")
        .unwrap_or("get")
        .to_ascii_lowercase();

    let inputs = form
        .select(&input_selector)
        .filter(|input| {
            let ty = input.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            match ty.as_str() {
                "submit" | "button" | "image" | "reset" | "file" => false,
                "checkbox" | "radio" => input.value().attr("checked").is_some(),
                _ => true,
            }
        })
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Ok(FormTarget {
        action,
        method,
        inputs,
    })
}

/// Split a `Cookie` header value into `(name, value)` pairs.
pub(crate) fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            if name.is_empty() {
                None
            } else {
                Some((name.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Navigate with linear backoff plus jitter between attempts.
///
/// Returns the last error once `attempts` are spent.
#[instrument(level = "info", skip(session, base_delay))]
pub async fn navigate_with_retry(
    session: &mut dyn BrowserSession,
    url: &str,
    attempts: u32,
    base_delay: Duration,
) -> Result<(), SessionError> {
    let attempts = attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match session.navigate(url).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                warn!(attempt, error = %e, "Navigation exhausted retries");
                return Err(e);
            }
            Err(e) => {
                let jitter = if base_delay.is_zero() {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rng().random_range(0..=250))
                };
                let delay = base_delay.saturating_mul(attempt) + jitter;
                warn!(attempt, ?delay, error = %e, "Navigation failed; retrying");
                sleep(delay).await;
            }
        }
    }
}

fn on_login_page(session: &dyn BrowserSession) -> bool {
    session.find("input[name='username']").is_some()
        && session.find("input[name='password']").is_some()
}

/// Load `url` and, if it presents a login form, sign in with `credentials`.
#[instrument(level = "info", skip(session, credentials, retry_delay), fields(username = %credentials.username))]
pub async fn login(
    session: &mut dyn BrowserSession,
    url: &str,
    credentials: &Credentials,
    form_locator: &str,
    retry_delay: Duration,
) -> Result<(), SessionError> {
    navigate_with_retry(session, url, 3, retry_delay).await?;
    if !on_login_page(session) {
        debug!("No login form; session already authenticated");
        return Ok(());
    }

    let fields = vec![
        ("username".to_string(), credentials.username.clone()),
        ("password".to_string(), credentials.password.clone()),
    ];
    session.submit_form(form_locator, &fields).await?;

    if on_login_page(session) {
        return Err(SessionError::LoginRejected);
    }
    info!("Logged in");
    Ok(())
}

/// Keep a copy of a rendered page under `debug/`. Best effort.
pub async fn save_page(page: Option<String>, out_dir: &Path, tag: &str) {
    let Some(html) = page else {
        return;
    };
    let debug_dir = out_dir.join("debug");
    let path = debug_dir.join(format!("{tag}.html"));
    let written = async {
        fs::create_dir_all(&debug_dir).await?;
        fs::write(&path, html).await
    }
    .await;
    match written {
        Ok(()) => debug!(path = %path.display(), "Saved page"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to save page"),
    }
}
