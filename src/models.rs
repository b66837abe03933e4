//! Data models for collected briefing artifacts.
//!
//! This module defines the value types shared by every provider:
//! - [`ChartAsset`]: a fetched image or document (satellite, radar, charts)
//! - [`TextAsset`]: a generated text artifact such as a METAR/TAF digest
//! - [`Briefing`]: the run aggregate that accumulates assets and notes
//!
//! Providers only ever append to a [`Briefing`]; nothing removes or reorders
//! entries once they are pushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

/// Free-form diagnostic data attached to an asset.
pub type Extras = BTreeMap<String, Value>;

/// A single fetched chart or image.
///
/// `local_path` is set only once bytes were written to disk. An asset
/// without a `local_path` is a recorded attempt whose download failed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartAsset {
    /// Human-readable name, e.g. `"Surface Pressure Chart 0"`.
    pub name: String,
    /// `analysis`, `radar`, `satellite`, `chart`, ...
    pub kind: String,
    /// The URL the bytes were requested from.
    pub original_url: String,
    pub fetched_at_utc: DateTime<Utc>,
    pub local_path: Option<PathBuf>,
    pub content_type: Option<String>,
    /// Identifier of the provider that produced this asset.
    pub source: Option<String>,
    #[serde(default)]
    pub extras: Extras,
}

impl ChartAsset {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        original_url: impl Into<String>,
        fetched_at_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            original_url: original_url.into(),
            fetched_at_utc,
            local_path: None,
            content_type: None,
            source: None,
            extras: Extras::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Note where the bytes actually came from when the request was
    /// redirected away from `original_url`.
    pub fn record_redirect(&mut self, final_url: &str) {
        if !final_url.is_empty() && final_url != self.original_url {
            self.extras.insert("final_url".to_string(), final_url.into());
        }
    }

    /// Whether the bytes for this asset made it to disk.
    pub fn is_saved(&self) -> bool {
        self.local_path.is_some()
    }
}

/// A generated or extracted text artifact.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextAsset {
    pub name: String,
    /// e.g. `metar_taf`
    pub kind: String,
    pub generated_at_utc: DateTime<Utc>,
    pub local_path: Option<PathBuf>,
    pub source: Option<String>,
    #[serde(default)]
    pub extras: Extras,
}

/// Everything collected during one run.
///
/// Created once by the orchestrator and handed by `&mut` to each provider in
/// turn. `generated_at_utc` doubles as the run's reference clock.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Briefing {
    pub generated_at_utc: DateTime<Utc>,
    pub charts: Vec<ChartAsset>,
    pub texts: Vec<TextAsset>,
    pub notes: Vec<String>,
    pub health: BTreeMap<String, Value>,
}

impl Briefing {
    pub fn new(generated_at_utc: DateTime<Utc>) -> Self {
        Self {
            generated_at_utc,
            charts: Vec::new(),
            texts: Vec::new(),
            notes: Vec::new(),
            health: BTreeMap::new(),
        }
    }

    /// Append a diagnostic note in the `"{provider}: {reason}"` form.
    pub fn note(&mut self, provider: &str, reason: impl Display) {
        self.notes.push(format!("{provider}: {reason}"));
    }

    /// Charts whose bytes were persisted.
    pub fn saved_charts(&self) -> usize {
        self.charts.iter().filter(|c| c.is_saved()).count()
    }

    /// Text assets that were written to disk.
    pub fn saved_texts(&self) -> usize {
        self.texts.iter().filter(|t| t.local_path.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 17, 37, 0).unwrap()
    }

    #[test]
    fn test_note_format() {
        let mut briefing = Briefing::new(at());
        briefing.note("met_ie_infrared", "no IR image found");
        assert_eq!(briefing.notes, vec!["met_ie_infrared: no IR image found"]);
    }

    #[test]
    fn test_saved_counts_ignore_stubs() {
        let mut briefing = Briefing::new(at());
        let mut saved = ChartAsset::new("Chart 0", "analysis", "https://example.com/0.gif", at());
        saved.local_path = Some(PathBuf::from("out/spc_0.gif"));
        briefing.charts.push(saved);
        briefing
            .charts
            .push(ChartAsset::new("Chart 1", "analysis", "https://example.com/1.gif", at()));

        assert_eq!(briefing.charts.len(), 2);
        assert_eq!(briefing.saved_charts(), 1);
        assert_eq!(briefing.saved_texts(), 0);
    }

    #[test]
    fn test_chart_builder_sets_source_and_extras() {
        let asset = ChartAsset::new("Radar", "radar", "https://example.com/r.png", at())
            .with_source("metweb_radar_5min_ire")
            .with_extra("timestamp_hint", "202504021705");

        assert_eq!(asset.source.as_deref(), Some("metweb_radar_5min_ire"));
        assert_eq!(asset.extras["timestamp_hint"], "202504021705");
        assert!(!asset.is_saved());
    }

    #[test]
    fn test_record_redirect_only_when_url_changed() {
        let mut asset = ChartAsset::new("Chart 0", "analysis", "https://example.com/0.gif", at());
        asset.record_redirect("https://example.com/0.gif");
        assert!(asset.extras.is_empty());

        asset.record_redirect("https://cdn.example.com/0.gif");
        assert_eq!(asset.extras["final_url"], "https://cdn.example.com/0.gif");
        assert_eq!(asset.original_url, "https://example.com/0.gif");
    }

    #[test]
    fn test_briefing_serialization() {
        let mut briefing = Briefing::new(at());
        briefing.note("p", "r");
        let json = serde_json::to_string(&briefing).unwrap();
        assert!(json.contains("2025-04-02T17:37:00Z"));
        assert!(json.contains("\"notes\":[\"p: r\"]"));

        let back: Briefing = serde_json::from_str(&json).unwrap();
        assert_eq!(back.notes.len(), 1);
    }
}
