//! JSON dump of the final briefing.
//!
//! One file per run, named after the run's generation time:
//! ```text
//! output_dir/
//! └── briefing_20250402_173700.json
//! ```

use crate::models::Briefing;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `briefing` as pretty-printed JSON into `output_dir`.
///
/// Returns the path written.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_briefing(briefing: &Briefing, output_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(briefing)?;

    if let Err(e) = fs::create_dir_all(output_dir).await {
        error!(error = %e, "Failed to create output dir");
        return Err(e.into());
    }

    let path = output_dir.join(format!(
        "briefing_{}.json",
        briefing.generated_at_utc.format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, json).await?;
    info!(path = %path.display(), charts = briefing.charts.len(), "Wrote briefing JSON");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_write_briefing_names_file_by_run_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut briefing = Briefing::new(Utc.with_ymd_and_hms(2025, 4, 2, 17, 37, 5).unwrap());
        briefing.note("met_ie_infrared", "no IR image found in last 480 minutes");

        let path = write_briefing(&briefing, &dir.path().join("nested")).await.unwrap();

        assert_eq!(path, dir.path().join("nested/briefing_20250402_173705.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        let back: Briefing = serde_json::from_str(&text).unwrap();
        assert_eq!(back.notes, briefing.notes);
        assert!(text.contains("\n  \"generated_at_utc\""));
    }
}
