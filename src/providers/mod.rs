//! Weather data providers and the contract they share.
//!
//! Every source implements [`Provider`]. The fallible work lives in
//! [`Provider::try_collect`]; callers use [`Provider::collect`], which
//! creates the output directory, runs the provider, and turns any error into
//! exactly one `"{provider}: {reason}"` note. Nothing escapes a provider.
//!
//! # Supported Sources
//!
//! | Provider | Module | Method | Notes |
//! |----------|--------|--------|-------|
//! | Met Éireann IR satellite | [`grid`] | Time-stepped probe | Any grid-published image via strftime templates |
//! | Met Office surface pressure | [`surface_pressure`] | HTML scraping | Up to 8 chart images |
//! | Met Éireann self-briefing | [`metie_briefing`] | Browser session | METAR/TAF text and briefing charts; needs login |
//! | MetWeb radar | [`metweb_radar`] | Browser session | Latest 5-minute radar; needs login |
//!
//! # Failed downloads
//!
//! When a provider has located a concrete asset (its URL came from the
//! source) and the download fails, the asset is still appended without a
//! `local_path` so the attempt stays auditable. Probe candidates are guesses,
//! not located assets, so the grid probe never appends stubs.

use crate::cli::Secrets;
use crate::config::{Config, ProviderConfig};
use crate::error::{CollectError, FetchError};
use crate::fetch::HttpFetcher;
use crate::models::Briefing;
use crate::session::{HttpSessionBackend, SessionBackend};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info};

pub mod grid;
pub mod metie_briefing;
pub mod metweb_radar;
pub mod surface_pressure;

/// What one provider contributed to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// At least one asset was persisted.
    Collected { charts: usize, texts: usize },
    /// Ran to completion without persisting anything (see the notes).
    Empty,
    /// Gave up; the reason is also in the notes.
    Failed { reason: String },
}

impl ProviderOutcome {
    pub fn is_collected(&self) -> bool {
        matches!(self, ProviderOutcome::Collected { .. })
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used as the note prefix and asset source.
    fn name(&self) -> &str;

    /// Collect into `briefing`, writing files under `out_dir`.
    ///
    /// May append assets and notes before returning an error; whatever was
    /// appended stays.
    async fn try_collect(&self, briefing: &mut Briefing, out_dir: &Path) -> Result<(), CollectError>;

    /// Run the provider without ever failing the caller.
    async fn collect(&self, briefing: &mut Briefing, out_dir: &Path) -> ProviderOutcome {
        let charts_before = briefing.saved_charts();
        let texts_before = briefing.saved_texts();

        let result = match fs::create_dir_all(out_dir).await {
            Ok(()) => self.try_collect(briefing, out_dir).await,
            Err(e) => Err(CollectError::Io(e)),
        };

        let charts = briefing.saved_charts() - charts_before;
        let texts = briefing.saved_texts() - texts_before;
        match result {
            Err(e) => {
                error!(provider = %self.name(), error = %e, "Provider failed");
                briefing.note(self.name(), &e);
                ProviderOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(()) if charts + texts > 0 => {
                info!(provider = %self.name(), charts, texts, "Provider collected assets");
                ProviderOutcome::Collected { charts, texts }
            }
            Ok(()) => {
                info!(provider = %self.name(), "Provider finished without assets");
                ProviderOutcome::Empty
            }
        }
    }
}

/// Instantiate the configured providers in run order.
pub fn build(config: &Config, secrets: &Secrets) -> Result<Vec<Box<dyn Provider>>, FetchError> {
    let sessions: Arc<dyn SessionBackend> = Arc::new(HttpSessionBackend);
    let mut providers: Vec<Box<dyn Provider>> = Vec::with_capacity(config.providers.len());

    for entry in &config.providers {
        let provider: Box<dyn Provider> = match entry {
            ProviderConfig::GridProbe(c) => {
                let fetcher = HttpFetcher::new(Duration::from_secs(c.timeout_secs), &config.user_agent)?;
                Box::new(grid::GridProbeProvider::new(c.clone(), Arc::new(fetcher)))
            }
            ProviderConfig::SurfacePressure(c) => {
                let fetcher = HttpFetcher::new(Duration::from_secs(c.timeout_secs), &config.user_agent)?;
                Box::new(surface_pressure::SurfacePressureProvider::new(c.clone(), Arc::new(fetcher)))
            }
            ProviderConfig::MetieBriefing(c) => Box::new(metie_briefing::MetIeBriefingProvider::new(
                c.clone(),
                secrets.metie.clone(),
                Arc::clone(&sessions),
                &config.user_agent,
            )),
            ProviderConfig::MetwebRadar(c) => Box::new(metweb_radar::MetWebRadarProvider::new(
                c.clone(),
                secrets.metweb.clone(),
                Arc::clone(&sessions),
                &config.user_agent,
            )),
        };
        providers.push(provider);
    }

    info!(count = providers.len(), "Providers configured");
    Ok(providers)
}
