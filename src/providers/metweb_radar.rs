//! MetWeb latest 5-minute radar composite for Ireland.
//!
//! Logs in, follows the Observations → Radar → (5min): IRE menu from the home
//! page, and downloads the image shown there with the session's cookies.
//! Radar URLs usually embed the frame time as `..._YYYYMMDDHHMM_....png`;
//! when present it becomes part of the saved file name.

use crate::config::MetwebRadarConfig;
use crate::error::CollectError;
use crate::fetch::FoundAsset;
use crate::models::{Briefing, ChartAsset};
use crate::providers::Provider;
use crate::session::{
    login, navigate_with_retry, save_page, BrowserSession, Credentials, SessionBackend, SessionConfig,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

static TIMESTAMP_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(\d{12})_[^_]*$").expect("timestamp hint regex"));

pub struct MetWebRadarProvider {
    config: MetwebRadarConfig,
    credentials: Option<Credentials>,
    sessions: Arc<dyn SessionBackend>,
    session_config: SessionConfig,
}

/// The 12-digit frame time between the URL's last two underscores.
pub fn timestamp_hint(url: &str) -> Option<&str> {
    TIMESTAMP_HINT
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn radar_file_name(hint: Option<&str>) -> String {
    match hint {
        Some(ts) => format!("radar_5min_ire_{ts}.png"),
        None => "radar_5min_ire.png".to_string(),
    }
}

impl MetWebRadarProvider {
    pub fn new(
        config: MetwebRadarConfig,
        credentials: Option<Credentials>,
        sessions: Arc<dyn SessionBackend>,
        user_agent: &str,
    ) -> Self {
        let session_config = SessionConfig {
            headless: config.session.headless,
            timeout: config.session_timeout(),
            user_agent: user_agent.to_string(),
        };
        Self {
            config,
            credentials,
            sessions,
            session_config,
        }
    }

    async fn run(
        &self,
        session: &mut dyn BrowserSession,
        credentials: &Credentials,
        briefing: &mut Briefing,
        out_dir: &Path,
    ) -> Result<(), CollectError> {
        let retry_delay = self.config.session.retry_delay();
        let headless = self.session_config.headless;

        login(
            session,
            &self.config.login_url,
            credentials,
            &self.config.session.login_form,
            retry_delay,
        )
        .await?;
        navigate_with_retry(session, &self.config.home_url, 3, retry_delay).await?;
        if !headless {
            save_page(session.page_source(), out_dir, "home").await;
        }

        for (step, selector) in self.config.menu_path.iter().enumerate() {
            let href = session
                .find(selector)
                .and_then(|a| a.attr("href").map(str::to_string))
                .ok_or_else(|| CollectError::Markup(format!("menu link {selector}")))?;
            let here = Url::parse(&session.current_url().unwrap_or_else(|| self.config.home_url.clone()))?;
            let next = here.join(href.trim())?;
            debug!(step, url = %next, "Following menu link");
            navigate_with_retry(session, next.as_str(), 3, retry_delay).await?;
        }
        if !headless {
            save_page(session.page_source(), out_dir, "radar").await;
        }

        let img_src = session
            .find(&self.config.image_selector)
            .and_then(|img| img.attr("src").map(str::to_string))
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CollectError::Markup("radar img src not found".to_string()))?;
        let page_url = Url::parse(&session.current_url().unwrap_or_else(|| self.config.home_url.clone()))?;
        let img_url = page_url.join(img_src.trim())?.to_string();

        let fetcher = self
            .sessions
            .fetcher(&session.cookies(), &page_url, &self.session_config)?;

        let hint = timestamp_hint(&img_url);
        let mut asset = ChartAsset::new("MetWeb Radar 5-min IRE (Latest)", "radar", &img_url, briefing.generated_at_utc)
            .with_source(&self.config.name)
            .with_extra("url_src", img_src.as_str())
            .with_extra("timestamp_hint", hint.map_or(Value::Null, Value::from));

        let dir = out_dir.join(&self.config.subdir);
        let path = dir.join(radar_file_name(hint));
        let saved: Result<FoundAsset, CollectError> = async {
            let found = fetcher.fetch(&img_url).await?.require(&img_url)?;
            fs::create_dir_all(&dir).await?;
            fs::write(&path, &found.bytes).await?;
            Ok::<_, CollectError>(found)
        }
        .await;

        match saved {
            Ok(found) => {
                info!(url = %img_url, path = %path.display(), "Saved radar image");
                asset.record_redirect(&found.final_url);
                asset.local_path = Some(path);
                asset.content_type = found.content_type.or_else(|| Some("image/png".to_string()));
            }
            Err(e) => {
                warn!(url = %img_url, error = %e, "Radar download failed");
                briefing.note(&self.config.name, format!("radar download failed: {e}"));
            }
        }
        briefing.charts.push(asset);
        Ok(())
    }
}

#[async_trait]
impl Provider for MetWebRadarProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.config.name))]
    async fn try_collect(&self, briefing: &mut Briefing, out_dir: &Path) -> Result<(), CollectError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(CollectError::MissingCredentials)?;

        let mut session = self.sessions.open(&self.session_config).await?;
        let result = self.run(session.as_mut(), credentials, briefing, out_dir).await;
        if result.is_err() {
            save_page(session.page_source(), out_dir, "error_page").await;
        }
        session.quit().await;
        result
    }
}
