//! Latest-image lookup for sources published on a fixed time grid.
//!
//! The default instance fetches the most recent Met Éireann Ireland IR
//! satellite image by probing URLs such as
//! `https://www.met.ie/images/satellite/web17_sat_irl_ir_202504021730.jpeg`
//! and stepping back 15 minutes per miss.

use crate::config::GridProbeConfig;
use crate::error::CollectError;
use crate::fetch::Fetch;
use crate::models::{Briefing, ChartAsset};
use crate::probe::{ProbeReport, ProbeTarget, TimeProbe};
use crate::providers::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, instrument};

pub struct GridProbeProvider {
    config: GridProbeConfig,
    fetcher: Arc<dyn Fetch>,
}

impl GridProbeProvider {
    pub fn new(config: GridProbeConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self { config, fetcher }
    }

    fn probe(&self) -> TimeProbe {
        TimeProbe::new(self.config.step_minutes, self.config.max_steps)
    }
}

impl ProbeTarget for GridProbeProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn locator(&self, t: DateTime<Utc>) -> String {
        t.format(&self.config.url_template).to_string()
    }

    fn file_name(&self, t: DateTime<Utc>) -> String {
        t.format(&self.config.file_template).to_string()
    }

    fn asset(&self, t: DateTime<Utc>, url: &str, fetched_at: DateTime<Utc>) -> ChartAsset {
        let mut asset = ChartAsset::new(
            t.format(&self.config.display_name).to_string(),
            &self.config.kind,
            url,
            fetched_at,
        )
        .with_source(&self.config.name);
        asset.content_type = self.config.content_type.clone();
        asset
    }
}

#[async_trait]
impl Provider for GridProbeProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.config.name))]
    async fn try_collect(&self, briefing: &mut Briefing, out_dir: &Path) -> Result<(), CollectError> {
        let dir = out_dir.join(&self.config.subdir);
        fs::create_dir_all(&dir).await?;

        // Exhaustion is reported as a note by the search itself.
        match self
            .probe()
            .search(self.fetcher.as_ref(), self, briefing, &dir)
            .await
        {
            ProbeReport::Found {
                timestamp,
                attempts,
                path,
            } => debug!(%timestamp, attempts, path = %path.display(), "Grid search hit"),
            ProbeReport::Exhausted {
                attempts,
                last_error,
            } => debug!(attempts, last_error = ?last_error.map(|e| e.to_string()), "Grid search exhausted"),
        }
        Ok(())
    }
}
