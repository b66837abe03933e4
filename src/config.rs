//! YAML configuration for a collection run.
//!
//! The file lists providers in the order they run. Every provider entry is
//! tagged with `type` and falls back to serde defaults for anything omitted:
//!
//! ```yaml
//! output_dir: out
//! providers:
//!   - type: grid_probe
//!     name: met_ie_infrared
//!     max_steps: 16
//!   - type: surface_pressure
//!   - type: metie_briefing
//!     briefing_url: https://briefing.met.ie/custombriefing.php?id=...
//!     station: EIME
//! ```
//!
//! Credentials are never read from this file; they come from the CLI or the
//! environment (see [`crate::cli::Cli`]).

use crate::error::ConfigError;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Upper bound on `step_minutes * max_steps` for a grid probe (one week).
pub const MAX_LOOKBACK_MINUTES: u64 = 7 * 24 * 60;

const METIE_TIMEOUT_SECS: u64 = 30;
const METWEB_TIMEOUT_SECS: u64 = 25;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            user_agent: default_user_agent(),
            providers: default_providers(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::GridProbe(GridProbeConfig::default()),
        ProviderConfig::SurfacePressure(SurfacePressureConfig::default()),
    ]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    GridProbe(GridProbeConfig),
    SurfacePressure(SurfacePressureConfig),
    MetieBriefing(MetieBriefingConfig),
    MetwebRadar(MetwebRadarConfig),
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        match self {
            ProviderConfig::GridProbe(c) => &c.name,
            ProviderConfig::SurfacePressure(c) => &c.name,
            ProviderConfig::MetieBriefing(c) => &c.name,
            ProviderConfig::MetwebRadar(c) => &c.name,
        }
    }
}

/// A source publishing one image per grid interval at a time-derived URL.
///
/// `url_template`, `file_template` and `display_name` are chrono strftime
/// patterns evaluated at the candidate timestamp (UTC).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridProbeConfig {
    pub name: String,
    pub display_name: String,
    pub kind: String,
    /// Used in the exhaustion note, e.g. "no IR image found ...".
    pub label: String,
    pub url_template: String,
    pub file_template: String,
    pub content_type: Option<String>,
    pub subdir: PathBuf,
    pub step_minutes: u32,
    pub max_steps: u32,
    pub timeout_secs: u64,
}

impl Default for GridProbeConfig {
    fn default() -> Self {
        Self {
            name: "met_ie_infrared".to_string(),
            display_name: "Ireland IR Satellite %H%MZ (Latest Found)".to_string(),
            kind: "satellite".to_string(),
            label: "IR image".to_string(),
            url_template: "https://www.met.ie/images/satellite/web17_sat_irl_ir_%Y%m%d%H%M.jpeg"
                .to_string(),
            file_template: "ireland_ir_%Y%m%d_%H%M.jpeg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            subdir: PathBuf::from("charts/satellite"),
            step_minutes: 15,
            // 32 * 15min = 8 hours
            max_steps: 32,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SurfacePressureConfig {
    pub name: String,
    pub page_url: String,
    pub subdir: PathBuf,
    /// Charts are looked up as `li#chartColour0` .. `li#chartColour{max_charts - 1}`.
    pub max_charts: usize,
    pub timeout_secs: u64,
}

impl Default for SurfacePressureConfig {
    fn default() -> Self {
        Self {
            name: "metoffice_surface_pressure".to_string(),
            page_url: "https://weather.metoffice.gov.uk/maps-and-charts/surface-pressure"
                .to_string(),
            subdir: PathBuf::from("charts/surface_pressure"),
            max_charts: 8,
            timeout_secs: 20,
        }
    }
}

/// Options shared by providers that drive a browser session.
///
/// These are flattened into each provider's entry. `timeout_secs` is left
/// unset when omitted so each provider can supply its own default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionOptions {
    pub headless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// CSS selector of the login form.
    pub login_form: String,
    /// Base delay between navigation retries.
    pub retry_delay_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: None,
            login_form: "form".to_string(),
            retry_delay_ms: 1500,
        }
    }
}

impl SessionOptions {
    /// The configured timeout, or `default_secs` when none was given.
    pub fn timeout_or(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(default_secs))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// A chart image on the briefing page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BriefingChart {
    pub display_name: String,
    pub kind: String,
    pub selector: String,
}

impl BriefingChart {
    fn new(display_name: &str, kind: &str, selector: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            kind: kind.to_string(),
            selector: selector.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetieBriefingConfig {
    pub name: String,
    pub base_url: String,
    /// Per-user custom briefing link; required.
    pub briefing_url: String,
    pub station: String,
    /// Alternative name a report may carry instead of the station code.
    pub station_alias: Option<String>,
    pub report_selector: String,
    pub charts: Vec<BriefingChart>,
    #[serde(flatten)]
    pub session: SessionOptions,
}

impl Default for MetieBriefingConfig {
    fn default() -> Self {
        Self {
            name: "metie_selfbrief".to_string(),
            base_url: "https://briefing.met.ie/".to_string(),
            briefing_url: String::new(),
            station: "EIME".to_string(),
            station_alias: Some("CASEMENT".to_string()),
            report_selector: "td.briefingText".to_string(),
            charts: vec![
                BriefingChart::new(
                    "SigWx Charts",
                    "sigwx",
                    "body > div > div:nth-of-type(10) table tr:nth-of-type(1) td:nth-of-type(2) img",
                ),
                BriefingChart::new(
                    "Low Level Wind & Temp Charts",
                    "wind_temp",
                    "body > div > div:nth-of-type(11) table tr td:nth-of-type(2) img",
                ),
                BriefingChart::new(
                    "Low Level Sig Weather Charts",
                    "low_sigwx",
                    "body > div > div:nth-of-type(12) table tr td:nth-of-type(2) img",
                ),
            ],
            session: SessionOptions::default(),
        }
    }
}

impl MetieBriefingConfig {
    pub fn session_timeout(&self) -> Duration {
        self.session.timeout_or(METIE_TIMEOUT_SECS)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetwebRadarConfig {
    pub name: String,
    pub login_url: String,
    pub home_url: String,
    /// Links followed in order from the home page to reach the radar view.
    pub menu_path: Vec<String>,
    pub image_selector: String,
    pub subdir: PathBuf,
    #[serde(flatten)]
    pub session: SessionOptions,
}

impl Default for MetwebRadarConfig {
    fn default() -> Self {
        Self {
            name: "metweb_radar_5min_ire".to_string(),
            login_url: "https://www.metweb.ie/login".to_string(),
            home_url: "https://www.metweb.ie/home-page".to_string(),
            menu_path: vec![
                "header nav:nth-of-type(2) > ul > li:nth-of-type(2) > a".to_string(),
                "header nav:nth-of-type(2) > ul > li:nth-of-type(2) > ul > li:nth-of-type(3) > a"
                    .to_string(),
                "header nav:nth-of-type(2) > ul > li:nth-of-type(2) > ul > li:nth-of-type(3) > ul > li:nth-of-type(1) > a"
                    .to_string(),
            ],
            image_selector: "article section img".to_string(),
            subdir: PathBuf::from("charts/radar"),
            session: SessionOptions::default(),
        }
    }
}

impl MetwebRadarConfig {
    pub fn session_timeout(&self) -> Duration {
        self.session.timeout_or(METWEB_TIMEOUT_SECS)
    }
}

impl Config {
    /// Read and validate a YAML config file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        info!(providers = config.providers.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for provider in &self.providers {
            if provider.name().trim().is_empty() {
                return Err(invalid("provider name must not be empty"));
            }
            match provider {
                ProviderConfig::GridProbe(c) => {
                    if c.step_minutes == 0 {
                        return Err(invalid(format!("{}: step_minutes must be at least 1", c.name)));
                    }
                    let window = u64::from(c.step_minutes) * u64::from(c.max_steps);
                    if u64::from(c.step_minutes) > MAX_LOOKBACK_MINUTES || window > MAX_LOOKBACK_MINUTES {
                        return Err(invalid(format!(
                            "{}: step_minutes * max_steps must not exceed {MAX_LOOKBACK_MINUTES} minutes",
                            c.name
                        )));
                    }
                    for (field, tpl) in [
                        ("url_template", &c.url_template),
                        ("file_template", &c.file_template),
                        ("display_name", &c.display_name),
                    ] {
                        if !is_valid_strftime(tpl) {
                            return Err(invalid(format!("{}: {field} is not a valid strftime pattern", c.name)));
                        }
                    }
                    require_url(&c.name, "url_template", &c.url_template)?;
                }
                ProviderConfig::SurfacePressure(c) => {
                    require_url(&c.name, "page_url", &c.page_url)?;
                }
                ProviderConfig::MetieBriefing(c) => {
                    require_url(&c.name, "briefing_url", &c.briefing_url)?;
                    require_url(&c.name, "base_url", &c.base_url)?;
                    if c.station.trim().is_empty() {
                        return Err(invalid(format!("{}: station must not be empty", c.name)));
                    }
                }
                ProviderConfig::MetwebRadar(c) => {
                    require_url(&c.name, "login_url", &c.login_url)?;
                    require_url(&c.name, "home_url", &c.home_url)?;
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn require_url(provider: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{provider}: {field} is required")));
    }
    // Templates may contain % specifiers, which url tolerates.
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| invalid(format!("{provider}: {field} is not a valid URL: {e}")))
}

/// Whether chrono can format with `pattern` without error.
pub fn is_valid_strftime(pattern: &str) -> bool {
    !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}
