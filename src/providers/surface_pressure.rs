//! Met Office surface pressure chart scraper.
//!
//! The chart page lists each forecast step as `<li id="chartColour{i}">`
//! holding an `<img>` whose `src` (or lazy-loaded `data-src`) points at the
//! chart. Every chart found is downloaded to `spc_{i}{ext}`.

use crate::config::SurfacePressureConfig;
use crate::error::CollectError;
use crate::fetch::{extension_for, Fetch, FoundAsset};
use crate::models::{Briefing, ChartAsset};
use crate::providers::Provider;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub struct SurfacePressureProvider {
    config: SurfacePressureConfig,
    fetcher: Arc<dyn Fetch>,
}

impl SurfacePressureProvider {
    pub fn new(config: SurfacePressureConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self { config, fetcher }
    }

    /// Download `url` next to `path_stem`, picking the extension from the
    /// response.
    async fn download(&self, url: &str, path_stem: &Path) -> Result<(PathBuf, FoundAsset), CollectError> {
        let mut found = self.fetcher.fetch(url).await?.require(url)?;
        if found.content_type.is_none() {
            found.content_type = Some("image/gif".to_string());
        }
        let ext = extension_for(url, found.content_type.as_deref(), ".gif");
        let path = path_stem.with_extension(ext.trim_start_matches('.'));
        fs::write(&path, &found.bytes).await?;
        Ok((path, found))
    }
}

/// `(index, absolute image URL)` for each chart slot present on the page.
pub fn chart_images(html: &str, page_url: &Url, max_charts: usize) -> Vec<(usize, String)> {
    let document = Html::parse_document(html);
    let mut images = Vec::new();
    for i in 0..max_charts {
        let Ok(selector) = Selector::parse(&format!("li#chartColour{i} img")) else {
            continue;
        };
        let Some(img) = document.select(&selector).next() else {
            continue;
        };
        let src = img
            .value()
            .attr("src")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| img.value().attr("data-src"));
        let Some(src) = src else {
            continue;
        };
        match page_url.join(src.trim()) {
            Ok(resolved) => images.push((i, resolved.to_string())),
            Err(e) => warn!(index = i, %src, error = %e, "Unresolvable chart src"),
        }
    }
    images
}

#[async_trait]
impl Provider for SurfacePressureProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.config.name))]
    async fn try_collect(&self, briefing: &mut Briefing, out_dir: &Path) -> Result<(), CollectError> {
        let name = self.config.name.as_str();
        let now = briefing.generated_at_utc;
        let dir = out_dir.join(&self.config.subdir);
        fs::create_dir_all(&dir).await?;

        let page_url = Url::parse(&self.config.page_url)?;
        let page = self
            .fetcher
            .fetch(page_url.as_str())
            .await
            .and_then(|r| r.require(page_url.as_str()))
            .map_err(CollectError::Page)?;
        let html = String::from_utf8_lossy(&page.bytes);

        let images = chart_images(&html, &page_url, self.config.max_charts);
        debug!(count = images.len(), "Chart images on page");

        let mut downloaded = 0usize;
        for (i, img_url) in images {
            let mut asset = ChartAsset::new(format!("Surface Pressure Chart {i}"), "analysis", &img_url, now)
                .with_source(name)
                .with_extra("chart_index", i);

            match self.download(&img_url, &dir.join(format!("spc_{i}"))).await {
                Ok((path, found)) => {
                    asset.record_redirect(&found.final_url);
                    asset.local_path = Some(path);
                    asset.content_type = found.content_type;
                    downloaded += 1;
                }
                Err(e) => {
                    warn!(index = i, url = %img_url, error = %e, "Chart download failed");
                    briefing.note(name, format!("failed chart {i}: {e}"));
                }
            }
            briefing.charts.push(asset);
        }

        if downloaded == 0 {
            briefing.note(name, "no charts downloaded (page structure may have changed)");
        }
        info!(downloaded, "Surface pressure charts done");
        Ok(())
    }
}
