//! Backward time-stepped probing for sources that publish on a fixed grid.
//!
//! Some sources publish one asset per interval at a URL computable from the
//! timestamp but expose no "latest" index. [`TimeProbe::search`] floors the
//! run's reference time to the grid, then walks backwards one step at a time
//! until a candidate is retrieved or `max_steps + 1` attempts are spent.
//!
//! # Outcomes per attempt
//!
//! | Retrieval | Effect |
//! |-----------|--------|
//! | found | bytes persisted, one [`ChartAsset`] appended, search stops |
//! | not found | silent miss, step back |
//! | error | remembered as the last error, step back |
//!
//! On exhaustion exactly one note is appended naming the window searched
//! (`step * max_steps` minutes) and the last error, if any.
//!
//! The anchor is computed once; later candidates are derived arithmetically
//! so a slow search never drifts with the wall clock.

use crate::error::FetchError;
use crate::fetch::{Fetch, Retrieval};
use crate::models::{Briefing, ChartAsset};
use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Floor `now` to the start of its `step_minutes` grid cell.
///
/// The grid is aligned to the Unix epoch, which for any step dividing 60
/// matches flooring the minute-of-hour. Seconds and sub-seconds are zeroed.
pub fn floor_to_grid(now: DateTime<Utc>, step_minutes: u32) -> DateTime<Utc> {
    let step_secs = i64::from(step_minutes.max(1)) * 60;
    let floored = now.timestamp().div_euclid(step_secs) * step_secs;
    DateTime::from_timestamp(floored, 0).unwrap_or(now)
}

/// Something published on a time grid: maps a candidate timestamp to the
/// URL to probe, the file to save, and the asset to record.
///
/// All three must be pure functions of the timestamp.
pub trait ProbeTarget: Send + Sync {
    /// Provider identifier used in notes and as the asset source.
    fn name(&self) -> &str;

    /// Short label for the kind of asset, used in the exhaustion note.
    fn label(&self) -> &str;

    fn locator(&self, t: DateTime<Utc>) -> String;

    fn file_name(&self, t: DateTime<Utc>) -> String;

    /// The asset to record when `t` is found. `local_path` is filled in by
    /// the search.
    fn asset(&self, t: DateTime<Utc>, url: &str, fetched_at: DateTime<Utc>) -> ChartAsset;
}

/// Grid parameters for one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeProbe {
    pub step_minutes: u32,
    pub max_steps: u32,
}

/// How a search ended.
#[derive(Debug)]
pub enum ProbeReport {
    Found {
        timestamp: DateTime<Utc>,
        attempts: u32,
        path: PathBuf,
    },
    Exhausted {
        attempts: u32,
        last_error: Option<FetchError>,
    },
}

impl TimeProbe {
    pub fn new(step_minutes: u32, max_steps: u32) -> Self {
        Self {
            step_minutes,
            max_steps,
        }
    }

    /// Total minutes covered behind the anchor.
    pub fn window_minutes(&self) -> u64 {
        u64::from(self.step_minutes) * u64::from(self.max_steps)
    }

    /// The `max_steps + 1` candidate timestamps, newest first.
    ///
    /// Ends early if stepping back would leave chrono's representable range.
    pub fn candidates(&self, now: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + use<> {
        let anchor = floor_to_grid(now, self.step_minutes);
        let step = i64::from(self.step_minutes);
        (0..=self.max_steps).map_while(move |i| {
            let back = TimeDelta::try_minutes(step.checked_mul(i64::from(i))?)?;
            anchor.checked_sub_signed(back)
        })
    }

    /// Walk the grid backwards from the briefing's reference time, saving
    /// the first asset found into `out_dir`.
    #[instrument(level = "info", skip_all, fields(provider = %target.name(), step = self.step_minutes, max_steps = self.max_steps))]
    pub async fn search<F, T>(
        &self,
        fetcher: &F,
        target: &T,
        briefing: &mut Briefing,
        out_dir: &Path,
    ) -> ProbeReport
    where
        F: Fetch + ?Sized,
        T: ProbeTarget + ?Sized,
    {
        let now = briefing.generated_at_utc;
        let mut attempts = 0u32;
        let mut last_error: Option<FetchError> = None;

        for t in self.candidates(now) {
            attempts += 1;
            let url = target.locator(t);

            let (bytes, content_type, final_url) = match fetcher.fetch(&url).await {
                Ok(Retrieval::Found {
                    bytes,
                    content_type,
                    final_url,
                }) => (bytes, content_type, final_url),
                Ok(Retrieval::NotFound) => {
                    debug!(%url, candidate = %t, "Probe miss");
                    continue;
                }
                Err(e) => {
                    warn!(%url, candidate = %t, error = %e, "Probe attempt failed; stepping back");
                    last_error = Some(e);
                    continue;
                }
            };

            let path = out_dir.join(target.file_name(t));
            if let Err(e) = fs::write(&path, &bytes).await {
                warn!(path = %path.display(), error = %e, "Failed to save probed asset; stepping back");
                last_error = Some(FetchError::Io(e));
                continue;
            }

            let mut asset = target
                .asset(t, &url, now)
                .with_extra("candidate_time_utc", t.to_rfc3339())
                .with_extra("attempts", attempts);
            asset.record_redirect(&final_url);
            asset.local_path = Some(path.clone());
            if content_type.is_some() {
                asset.content_type = content_type;
            }
            briefing.charts.push(asset);

            info!(%url, candidate = %t, attempts, path = %path.display(), "Found latest asset");
            return ProbeReport::Found {
                timestamp: t,
                attempts,
                path,
            };
        }

        if attempts < self.max_steps.saturating_add(1) {
            warn!(attempts, "Grid ran out of representable time; search cut short");
        }
        let mut reason = format!(
            "no {} found in last {} minutes",
            target.label(),
            self.window_minutes()
        );
        if let Some(e) = &last_error {
            reason.push_str(&format!(" (last error: {e})"));
        }
        warn!(attempts, %reason, "Probe search exhausted");
        briefing.note(target.name(), &reason);

        ProbeReport::Exhausted {
            attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{Scripted, ScriptedFetcher};
    use chrono::{Duration, TimeZone, Timelike};

    struct IrTarget;

    impl ProbeTarget for IrTarget {
        fn name(&self) -> &str {
            "met_ie_infrared"
        }

        fn label(&self) -> &str {
            "IR image"
        }

        fn locator(&self, t: DateTime<Utc>) -> String {
            format!("https://img.example/ir_{}.jpeg", t.format("%Y%m%d%H%M"))
        }

        fn file_name(&self, t: DateTime<Utc>) -> String {
            format!("ir_{}.jpeg", t.format("%Y%m%d_%H%M"))
        }

        fn asset(&self, t: DateTime<Utc>, url: &str, fetched_at: DateTime<Utc>) -> ChartAsset {
            ChartAsset::new(format!("IR {}Z", t.format("%H%M")), "satellite", url, fetched_at)
                .with_source(self.name())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 17, 37, 42).unwrap() + Duration::microseconds(123_456)
    }

    #[test]
    fn test_floor_to_grid_zeroes_seconds() {
        let floored = floor_to_grid(now(), 15);
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 4, 2, 17, 30, 0).unwrap());
        assert_eq!(floored.minute(), 30);
        assert_eq!(floored.second(), 0);
        assert_eq!(floored.nanosecond(), 0);
    }

    #[test]
    fn test_floor_on_grid_is_identity() {
        let on_grid = Utc.with_ymd_and_hms(2025, 4, 2, 17, 45, 0).unwrap();
        assert_eq!(floor_to_grid(on_grid, 15), on_grid);
        assert_eq!(floor_to_grid(on_grid, 5), on_grid);
    }

    #[test]
    fn test_candidates_step_back_by_exactly_one_step() {
        let probe = TimeProbe::new(15, 4);
        let c: Vec<_> = probe.candidates(now()).collect();
        assert_eq!(c.len(), 5);
        for pair in c.windows(2) {
            assert_eq!(pair[0] - pair[1], Duration::minutes(15));
        }
        assert_eq!(c[4], Utc.with_ymd_and_hms(2025, 4, 2, 16, 30, 0).unwrap());
    }

    #[test]
    fn test_candidates_cross_midnight() {
        let probe = TimeProbe::new(15, 2);
        let early = Utc.with_ymd_and_hms(2025, 4, 3, 0, 7, 0).unwrap();
        let c: Vec<_> = probe.candidates(early).collect();
        assert_eq!(c[0], Utc.with_ymd_and_hms(2025, 4, 3, 0, 0, 0).unwrap());
        assert_eq!(c[1], Utc.with_ymd_and_hms(2025, 4, 2, 23, 45, 0).unwrap());
    }

    #[tokio::test]
    async fn test_zero_max_steps_makes_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::always(Scripted::NotFound);
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(15, 0)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        assert!(matches!(report, ProbeReport::Exhausted { attempts: 1, .. }));
        assert_eq!(fetcher.requested(), vec!["https://img.example/ir_202504021730.jpeg"]);
        assert_eq!(briefing.notes, vec!["met_ie_infrared: no IR image found in last 0 minutes"]);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::sequence(vec![
            Scripted::NotFound,
            Scripted::NotFound,
            Scripted::Found(b"jpeg-bytes", Some("image/jpeg")),
        ]);
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(15, 32)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        let ProbeReport::Found {
            timestamp,
            attempts,
            path,
        } = report
        else {
            panic!("expected a hit");
        };
        assert_eq!(attempts, 3);
        assert_eq!(timestamp, Utc.with_ymd_and_hms(2025, 4, 2, 17, 0, 0).unwrap());
        assert_eq!(fetcher.requested().len(), 3);
        assert_eq!(path, dir.path().join("ir_20250402_1700.jpeg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg-bytes");

        assert_eq!(briefing.charts.len(), 1);
        assert!(briefing.notes.is_empty());
        let chart = &briefing.charts[0];
        assert_eq!(chart.name, "IR 1700Z");
        assert_eq!(chart.local_path.as_deref(), Some(path.as_path()));
        assert_eq!(chart.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(chart.extras["candidate_time_utc"], "2025-04-02T17:00:00+00:00");
        assert_eq!(chart.extras["attempts"], 3);
    }

    #[tokio::test]
    async fn test_all_misses_append_one_window_note() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::always(Scripted::NotFound);
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(15, 3)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        assert!(matches!(
            report,
            ProbeReport::Exhausted {
                attempts: 4,
                last_error: None
            }
        ));
        assert_eq!(fetcher.requested().len(), 4);
        assert!(briefing.charts.is_empty());
        assert_eq!(briefing.notes.len(), 1);
        assert!(briefing.notes[0].contains("45 minutes"));
        assert!(!briefing.notes[0].contains("last error"));
    }

    #[tokio::test]
    async fn test_exhaustion_note_keeps_earlier_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::sequence(vec![
            Scripted::Timeout,
            Scripted::NotFound,
            Scripted::NotFound,
            Scripted::NotFound,
        ]);
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(15, 3)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        let ProbeReport::Exhausted {
            attempts,
            last_error: Some(err),
        } = report
        else {
            panic!("expected exhaustion with an error");
        };
        assert_eq!(attempts, 4);
        assert_eq!(
            err.to_string(),
            "timed out fetching https://img.example/ir_202504021730.jpeg"
        );
        assert_eq!(briefing.notes.len(), 1);
        assert!(briefing.notes[0].ends_with(&format!("(last error: {err})")));
    }

    #[tokio::test]
    async fn test_transient_errors_keep_probing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::sequence(vec![
            Scripted::Status(503),
            Scripted::Timeout,
            Scripted::Found(b"x", None),
        ]);
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(15, 8)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        assert!(matches!(report, ProbeReport::Found { attempts: 3, .. }));
        assert_eq!(briefing.charts.len(), 1);
        assert!(briefing.notes.is_empty());
        assert_eq!(briefing.charts[0].content_type, None);
    }

    #[tokio::test]
    async fn test_same_now_gives_same_candidates_and_file() {
        let probe = TimeProbe::new(15, 3);
        let first = ScriptedFetcher::always(Scripted::Found(b"a", None));
        let second = ScriptedFetcher::always(Scripted::Found(b"a", None));
        let dir = tempfile::tempdir().unwrap();

        let mut b1 = Briefing::new(now());
        let mut b2 = Briefing::new(now());
        probe.search(&first, &IrTarget, &mut b1, dir.path()).await;
        probe.search(&second, &IrTarget, &mut b2, dir.path()).await;

        assert_eq!(first.requested(), second.requested());
        assert_eq!(b1.charts[0].local_path, b2.charts[0].local_path);
        assert_eq!(
            probe.candidates(now()).collect::<Vec<_>>(),
            probe.candidates(now()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_unwritable_output_counts_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let fetcher = ScriptedFetcher::always(Scripted::Found(b"a", None));
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(15, 1)
            .search(&fetcher, &IrTarget, &mut briefing, &missing)
            .await;

        assert!(matches!(
            report,
            ProbeReport::Exhausted {
                attempts: 2,
                last_error: Some(FetchError::Io(_))
            }
        ));
        assert!(briefing.charts.is_empty());
        assert!(briefing.notes[0].contains("15 minutes"));
    }

    #[test]
    fn test_huge_step_stops_at_time_range() {
        let probe = TimeProbe::new(u32::MAX, 40);
        let c: Vec<_> = probe.candidates(now()).collect();
        assert!(!c.is_empty());
        assert!(c.len() <= 41);
        for pair in c.windows(2) {
            assert_eq!(pair[0] - pair[1], Duration::minutes(i64::from(u32::MAX)));
        }
    }

    #[tokio::test]
    async fn test_huge_step_search_exhausts_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::always(Scripted::NotFound);
        let mut briefing = Briefing::new(now());

        let report = TimeProbe::new(u32::MAX, 40)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        let ProbeReport::Exhausted { attempts, last_error: None } = report else {
            panic!("expected exhaustion");
        };
        assert!(attempts >= 1 && attempts <= 41);
        assert_eq!(fetcher.requested().len() as u32, attempts);
        assert_eq!(briefing.notes.len(), 1);
        assert!(briefing.notes[0].starts_with("met_ie_infrared: no IR image found"));
    }

    #[tokio::test]
    async fn test_redirected_hit_keeps_candidate_url_and_final_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::sequence(vec![
            Scripted::NotFound,
            Scripted::Redirected(b"jpeg-bytes", "https://mirror.example/ir/latest.jpeg"),
        ]);
        let mut briefing = Briefing::new(now());

        TimeProbe::new(15, 4)
            .search(&fetcher, &IrTarget, &mut briefing, dir.path())
            .await;

        let chart = &briefing.charts[0];
        assert_eq!(chart.original_url, "https://img.example/ir_202504021715.jpeg");
        assert_eq!(chart.extras["final_url"], "https://mirror.example/ir/latest.jpeg");
    }
}
