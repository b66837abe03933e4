//! Runs the configured providers, in order, against one shared [`Briefing`].
//!
//! Providers are invoked unconditionally: whatever one of them does, the next
//! one still runs. The orchestrator itself never fails; what went wrong is
//! recorded in the briefing's notes and in the per-provider outcomes.

use crate::models::Briefing;
use crate::providers::{Provider, ProviderOutcome};
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{info, instrument};

pub struct Orchestrator {
    providers: Vec<Box<dyn Provider>>,
    output_dir: PathBuf,
}

/// The finished run: the final briefing plus what each provider reported.
#[derive(Debug)]
pub struct RunReport {
    briefing: Briefing,
    outcomes: Vec<(String, ProviderOutcome)>,
}

impl Orchestrator {
    pub fn new(providers: Vec<Box<dyn Provider>>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            providers,
            output_dir: output_dir.into(),
        }
    }

    #[instrument(level = "info", skip_all, fields(output_dir = %self.output_dir.display(), providers = self.providers.len()))]
    pub async fn run(&self, generated_at: DateTime<Utc>) -> RunReport {
        let mut briefing = Briefing::new(generated_at);
        let mut outcomes = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let name = provider.name().to_string();
            info!(provider = %name, "Running provider");
            let outcome = provider.collect(&mut briefing, &self.output_dir).await;
            briefing
                .health
                .insert(name.clone(), serde_json::to_value(&outcome).unwrap_or_default());
            outcomes.push((name, outcome));
        }

        info!(
            charts = briefing.charts.len(),
            saved_charts = briefing.saved_charts(),
            texts = briefing.texts.len(),
            notes = briefing.notes.len(),
            "Run complete"
        );
        RunReport { briefing, outcomes }
    }
}

impl RunReport {
    pub fn briefing(&self) -> &Briefing {
        &self.briefing
    }

    pub fn outcomes(&self) -> &[(String, ProviderOutcome)] {
        &self.outcomes
    }

    /// No provider collected anything and nothing was persisted.
    ///
    /// A run with no providers at all counts as failed too.
    pub fn is_failure(&self) -> bool {
        let any_collected = self.outcomes.iter().any(|(_, o)| o.is_collected());
        !any_collected && self.briefing.saved_charts() + self.briefing.saved_texts() == 0
    }

    /// Human-readable run summary.
    pub fn summary(&self) -> String {
        let b = &self.briefing;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Briefing generated at {}",
            b.generated_at_utc.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, "Charts: {} ({} saved)", b.charts.len(), b.saved_charts());
        if !b.charts.is_empty() {
            let lines = b
                .charts
                .iter()
                .map(|c| {
                    let saved = c
                        .local_path
                        .as_ref()
                        .map_or_else(|| "(not saved)".to_string(), |p| p.display().to_string());
                    format!("  - {}\n      url:  {}\n      path: {}", c.name, c.original_url, saved)
                })
                .join("\n");
            let _ = writeln!(out, "{lines}");
        }

        let _ = writeln!(out, "Texts: {}", b.texts.len());
        for t in &b.texts {
            let saved = t
                .local_path
                .as_ref()
                .map_or_else(|| "(not saved)".to_string(), |p| p.display().to_string());
            let _ = writeln!(out, "  - {}: {}", t.name, saved);
        }

        let _ = writeln!(out, "Notes: {}", b.notes.len());
        for note in &b.notes {
            let _ = writeln!(out, "  - {note}");
        }

        let status = self
            .outcomes
            .iter()
            .map(|(name, outcome)| match outcome {
                ProviderOutcome::Collected { charts, texts } => {
                    format!("{name}=collected({charts} charts, {texts} texts)")
                }
                ProviderOutcome::Empty => format!("{name}=empty"),
                ProviderOutcome::Failed { .. } => format!("{name}=failed"),
            })
            .join(", ");
        let _ = writeln!(out, "Providers: {status}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridProbeConfig;
    use crate::error::CollectError;
    use crate::fetch::testing::{Scripted, ScriptedFetcher};
    use crate::models::{ChartAsset, TextAsset};
    use crate::providers::grid::GridProbeProvider;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::Path;
    use std::sync::Arc;

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 17, 37, 0).unwrap()
    }

    /// Appends `saved` persisted charts, one stub and one note.
    struct Canned {
        name: &'static str,
        saved: usize,
    }

    #[async_trait]
    impl Provider for Canned {
        fn name(&self) -> &str {
            self.name
        }

        async fn try_collect(&self, briefing: &mut Briefing, out_dir: &Path) -> Result<(), CollectError> {
            for i in 0..self.saved {
                let path = out_dir.join(format!("{}_{i}.png", self.name));
                tokio::fs::write(&path, b"png").await?;
                let mut chart = ChartAsset::new(format!("{} {i}", self.name), "chart", "https://x/c.png", briefing.generated_at_utc)
                    .with_source(self.name);
                chart.local_path = Some(path);
                briefing.charts.push(chart);
            }
            briefing
                .charts
                .push(ChartAsset::new("stub", "chart", "https://x/missing.png", briefing.generated_at_utc));
            briefing.note(self.name, "one chart missing");
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Provider for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn try_collect(&self, _briefing: &mut Briefing, _out_dir: &Path) -> Result<(), CollectError> {
            Err(CollectError::MissingCredentials)
        }
    }

    fn failing_probe() -> Box<dyn Provider> {
        let config = GridProbeConfig {
            max_steps: 2,
            ..GridProbeConfig::default()
        };
        Box::new(GridProbeProvider::new(
            config,
            Arc::new(ScriptedFetcher::always(Scripted::Timeout)),
        ))
    }

    #[tokio::test]
    async fn test_failing_provider_does_not_block_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            vec![failing_probe(), Box::new(Canned { name: "canned", saved: 2 })],
            dir.path(),
        );

        let report = orchestrator.run(run_at()).await;
        let b = report.briefing();

        assert_eq!(b.saved_charts(), 2);
        assert_eq!(b.charts.len(), 3);
        assert_eq!(b.notes.len(), 2);
        assert!(b.notes[0].starts_with("met_ie_infrared: no IR image found in last 30 minutes"));
        assert_eq!(b.notes[1], "canned: one chart missing");
        assert_eq!(report.outcomes()[0].1, ProviderOutcome::Empty);
        assert!(report.outcomes()[1].1.is_collected());
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn test_totals_are_sum_of_contributions() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            vec![
                Box::new(Canned { name: "a", saved: 1 }),
                Box::new(Broken),
                Box::new(Canned { name: "b", saved: 3 }),
            ],
            dir.path(),
        );

        let report = orchestrator.run(run_at()).await;
        let b = report.briefing();

        // a: 1 saved + 1 stub, b: 3 saved + 1 stub
        assert_eq!(b.charts.len(), 6);
        assert_eq!(b.saved_charts(), 4);
        // a, broken, b each left exactly one note
        assert_eq!(
            b.notes,
            vec!["a: one chart missing", "broken: credentials not configured", "b: one chart missing"]
        );
        assert_eq!(b.charts[0].source.as_deref(), Some("a"));
        assert_eq!(b.charts[2].source.as_deref(), Some("b"));
        assert_eq!(b.health.len(), 3);
        assert_eq!(b.health["broken"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_failure_only_when_nothing_collected() {
        let dir = tempfile::tempdir().unwrap();

        let report = Orchestrator::new(vec![Box::new(Broken), failing_probe()], dir.path())
            .run(run_at())
            .await;
        assert!(report.is_failure());

        let report = Orchestrator::new(Vec::new(), dir.path()).run(run_at()).await;
        assert!(report.is_failure());

        let report = Orchestrator::new(
            vec![Box::new(Broken), Box::new(Canned { name: "c", saved: 1 })],
            dir.path(),
        )
        .run(run_at())
        .await;
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn test_summary_lists_charts_texts_and_notes() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Orchestrator::new(vec![Box::new(Canned { name: "c", saved: 1 })], dir.path())
            .run(run_at())
            .await;
        report.briefing.texts.push(TextAsset {
            name: "METAR/TAF EIME".to_string(),
            kind: "metar_taf".to_string(),
            generated_at_utc: run_at(),
            local_path: Some(PathBuf::from("out/text/metar_taf_EIME.txt")),
            source: None,
            extras: Default::default(),
        });

        let summary = report.summary();

        assert!(summary.starts_with("Briefing generated at 2025-04-02T17:37:00Z\n"));
        assert!(summary.contains("Charts: 2 (1 saved)"));
        assert!(summary.contains("  - c 0\n      url:  https://x/c.png\n      path: "));
        assert!(summary.contains("  - stub\n      url:  https://x/missing.png\n      path: (not saved)"));
        assert!(summary.contains("  - METAR/TAF EIME: out/text/metar_taf_EIME.txt"));
        assert!(summary.contains("Notes: 1\n  - c: one chart missing"));
        assert!(summary.contains("Providers: c=collected(1 charts, 0 texts)"));
    }
}
