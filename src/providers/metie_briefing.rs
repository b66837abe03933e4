//! Met Éireann self-briefing: METAR/TAF text and briefing charts.
//!
//! The custom briefing page is per-user and sits behind a login. After
//! signing in, the provider reads every report cell, picks the METAR and TAF
//! for the configured station, writes them to a text file, and downloads the
//! chart images with the session's cookies.

use crate::config::{BriefingChart, MetieBriefingConfig};
use crate::error::CollectError;
use crate::fetch::{extension_for, Fetch, FoundAsset};
use crate::models::{Briefing, ChartAsset, Extras, TextAsset};
use crate::providers::Provider;
use crate::session::{
    login, navigate_with_retry, save_page, BrowserSession, Credentials, SessionBackend, SessionConfig,
};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub struct MetIeBriefingProvider {
    config: MetieBriefingConfig,
    credentials: Option<Credentials>,
    sessions: Arc<dyn SessionBackend>,
    session_config: SessionConfig,
}

impl MetIeBriefingProvider {
    pub fn new(
        config: MetieBriefingConfig,
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
        let name = self.config.name.as_str();
        let now = briefing.generated_at_utc;
        let retry_delay = self.config.session.retry_delay();

        login(
            session,
            &self.config.briefing_url,
            credentials,
            &self.config.session.login_form,
            retry_delay,
        )
        .await?;
        navigate_with_retry(session, &self.config.briefing_url, 3, retry_delay).await?;
        if !self.session_config.headless {
            save_page(session.page_source(), out_dir, "briefing").await;
        }

        let cells: Vec<String> = session
            .find_all(&self.config.report_selector)
            .iter()
            .map(|el| session.extract_text(el))
            .filter(|t| !t.is_empty())
            .collect();
        let station = self.config.station.as_str();
        let alias = self.config.station_alias.as_deref();
        let metar = pick_report(&cells, "METAR", station, alias);
        let taf = pick_report(&cells, "TAF", station, alias);
        if metar.is_none() && taf.is_none() {
            return Err(CollectError::Markup(format!(
                "no METAR/TAF in {} cells",
                self.config.report_selector
            )));
        }
        debug!(
            cells = cells.len(),
            metar = %truncate_for_log(metar.unwrap_or("-"), 80),
            "Picked station reports"
        );

        let text_dir = out_dir.join("text");
        fs::create_dir_all(&text_dir).await?;
        let path = text_dir.join(format!(
            "metar_taf_{}_{}.txt",
            station.to_lowercase(),
            now.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, render_report(now, station, metar, taf)).await?;
        info!(path = %path.display(), "Wrote METAR/TAF report");

        let mut extras = Extras::new();
        extras.insert("station".to_string(), station.into());
        briefing.texts.push(TextAsset {
            name: format!("METAR/TAF {station}"),
            kind: "metar_taf".to_string(),
            generated_at_utc: now,
            local_path: Some(path),
            source: Some(name.to_string()),
            extras,
        });

        let base = Url::parse(&self.config.base_url)?;
        let fetcher = self
            .sessions
            .fetcher(&session.cookies(), &base, &self.session_config)?;
        let charts_dir = out_dir.join("charts").join(name);
        fs::create_dir_all(&charts_dir).await?;

        for chart in &self.config.charts {
            let Some(src) = session
                .find(&chart.selector)
                .and_then(|img| img.attr("src").map(str::to_string))
                .filter(|s| !s.trim().is_empty())
            else {
                briefing.note(name, format!("{}: img src missing", chart.display_name));
                continue;
            };
            let url = match base.join(src.trim()) {
                Ok(u) => u.to_string(),
                Err(e) => {
                    briefing.note(name, format!("{}: bad img src {src}: {e}", chart.display_name));
                    continue;
                }
            };
            self.download_chart(fetcher.as_ref(), chart, &url, &charts_dir, now, briefing)
                .await;
        }
        Ok(())
    }

    async fn download_chart(
        &self,
        fetcher: &dyn Fetch,
        chart: &BriefingChart,
        url: &str,
        charts_dir: &Path,
        now: DateTime<Utc>,
        briefing: &mut Briefing,
    ) {
        let name = self.config.name.as_str();
        let mut asset = ChartAsset::new(&chart.display_name, "chart", url, now)
            .with_source(name)
            .with_extra("selector", chart.selector.as_str());

        let saved: Result<(PathBuf, FoundAsset), CollectError> = async {
            let found = fetcher.fetch(url).await?.require(url)?;
            let ext = extension_for(url, found.content_type.as_deref(), ".bin");
            let path = charts_dir.join(format!("{}_{}{ext}", chart.kind, now.format("%Y%m%d_%H%M%S")));
            fs::write(&path, &found.bytes).await?;
            Ok::<_, CollectError>((path, found))
        }
        .await;

        match saved {
            Ok((path, found)) => {
                debug!(chart = %chart.display_name, path = %path.display(), "Saved briefing chart");
                asset.record_redirect(&found.final_url);
                asset.local_path = Some(path);
                asset.content_type = found.content_type;
            }
            Err(e) => {
                warn!(chart = %chart.display_name, %url, error = %e, "Briefing chart download failed");
                briefing.note(name, format!("{}: download failed: {e}", chart.display_name));
            }
        }
        briefing.charts.push(asset);
    }
}

/// Choose the report starting with `prefix`: the station's own first, then
/// one mentioning `alias`, then any.
pub fn pick_report<'a>(cells: &'a [String], prefix: &str, station: &str, alias: Option<&str>) -> Option<&'a str> {
    let prefix = prefix.to_uppercase();
    let candidates: Vec<(&str, String)> = cells
        .iter()
        .map(|c| (c.as_str(), c.to_uppercase()))
        .filter(|(_, up)| up.starts_with(&prefix))
        .collect();

    let station = station.trim().to_uppercase();
    candidates
        .iter()
        .find(|(_, up)| up.contains(&station))
        .or_else(|| {
            let alias = alias?.trim().to_uppercase();
            candidates.iter().find(|(_, up)| up.contains(&alias))
        })
        .or_else(|| candidates.first())
        .map(|(text, _)| *text)
}

pub fn render_report(now: DateTime<Utc>, station: &str, metar: Option<&str>, taf: Option<&str>) -> String {
    [
        "Met Éireann Self Briefing".to_string(),
        format!("Generated (UTC): {}", now.format("%Y-%m-%d %H:%M")),
        format!("Station: {station}"),
        String::new(),
        "METAR:".to_string(),
        metar.unwrap_or("(not found)").to_string(),
        String::new(),
        "TAF:".to_string(),
        taf.unwrap_or("(not found)").to_string(),
        String::new(),
    ]
    .join("\n")
}

#[async_trait]
impl Provider for MetIeBriefingProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.config.name, station = %self.config.station))]
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
