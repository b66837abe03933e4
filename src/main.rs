//! # Met Brief
//!
//! Collects an aviation weather briefing (satellite and radar imagery,
//! surface pressure charts, METAR/TAF text) from several independent and
//! unreliable sources into one output directory.
//!
//! ## Usage
//!
//! ```sh
//! met_brief -o ./out
//! met_brief -c briefing.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Configuration**: YAML provider list (or built-in defaults), credentials from CLI/env
//! 2. **Collection**: each provider runs in turn against one shared [`models::Briefing`]
//! 3. **Output**: text summary on stdout and a JSON dump of the briefing
//!
//! A source failing never stops the run; its failure ends up in the
//! briefing's notes. The process exits non-zero only when nothing at all
//! was collected.

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod config;
mod error;
mod fetch;
mod models;
mod orchestrator;
mod outputs;
mod probe;
mod providers;
mod session;
mod utils;

use cli::Cli;
use config::Config;
use orchestrator::Orchestrator;
use outputs::json;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("met_brief starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.config, ?args.output_dir, "Parsed CLI arguments");

    // ---- Load config ----
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            info!("No config file given; using built-in providers");
            Config::default()
        }
    };
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let secrets = args.secrets();
    for provider in &config.providers {
        let needs = match provider {
            config::ProviderConfig::MetieBriefing(_) => secrets.metie.is_none(),
            config::ProviderConfig::MetwebRadar(_) => secrets.metweb.is_none(),
            _ => false,
        };
        if needs {
            warn!(provider = %provider.name(), "No credentials configured; provider will be skipped with a note");
        }
    }

    // ---- Collect ----
    let providers = providers::build(&config, &secrets)?;
    let orchestrator = Orchestrator::new(providers, &config.output_dir);
    let report = orchestrator.run(Utc::now()).await;
    let collected = report
        .outcomes()
        .iter()
        .filter(|(_, outcome)| outcome.is_collected())
        .count();
    info!(collected, providers = report.outcomes().len(), "Providers finished");

    // ---- Outputs ----
    println!("{}", report.summary());
    if let Err(e) = json::write_briefing(report.briefing(), &config.output_dir).await {
        error!(error = %e, "Failed to write briefing JSON");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    if report.is_failure() {
        error!("No provider collected anything");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
