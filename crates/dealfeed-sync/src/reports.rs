use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::RunResult;

pub const RUN_RESULT_FILE: &str = "run_result.json";
pub const RUN_BRIEF_FILE: &str = "run_brief.md";

fn brief_markdown(result: &RunResult) -> String {
    let errors = if result.errors.is_empty() {
        "- none".to_string()
    } else {
        result
            .errors
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "# Deal Ingestion Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Emails processed: {}\n- Emails skipped: {}\n- Candidates found: {}\n- Deals stored: {}\n- Hotel offers cached: {}\n- Deals deactivated: {}\n\n## Errors\n{}\n",
        result.run_id,
        result.started_at,
        result.finished_at,
        result.emails_processed,
        result.emails_skipped,
        result.deals_found,
        result.deals_stored,
        result.hotels_cached,
        result.deals_deactivated,
        errors
    )
}

/// Writes `<reports_dir>/<run_id>/run_result.json` and a markdown brief next to it.
pub async fn write_run_report(reports_dir: &Path, result: &RunResult) -> Result<PathBuf> {
    let run_dir = reports_dir.join(result.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json_path = run_dir.join(RUN_RESULT_FILE);
    let json = serde_json::to_vec_pretty(result).context("serializing run result")?;
    fs::write(&json_path, json)
        .await
        .with_context(|| format!("writing {}", json_path.display()))?;

    let brief_path = run_dir.join(RUN_BRIEF_FILE);
    fs::write(&brief_path, brief_markdown(result))
        .await
        .with_context(|| format!("writing {}", brief_path.display()))?;

    Ok(run_dir)
}

/// Markdown summary of the newest `runs` reports under `reports_dir`.
/// Directories without a readable `run_result.json` are ignored.
pub fn recent_runs_markdown(reports_dir: &Path, runs: usize) -> Result<String> {
    let mut results = std::fs::read_dir(reports_dir)
        .with_context(|| format!("reading {}", reports_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let text = std::fs::read_to_string(entry.path().join(RUN_RESULT_FILE)).ok()?;
            serde_json::from_str::<RunResult>(&text).ok()
        })
        .collect::<Vec<_>>();
    results.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    let mut lines = vec!["# Deal Ingestion Runs".to_string(), String::new()];
    for result in results.into_iter().take(runs.max(1)) {
        lines.push(format!("## Run `{}`", result.run_id));
        lines.push(format!("- started: {}", result.started_at));
        lines.push(format!(
            "- emails: {} processed, {} skipped",
            result.emails_processed, result.emails_skipped
        ));
        lines.push(format!(
            "- deals: {} stored of {} found",
            result.deals_stored, result.deals_found
        ));
        lines.push(format!("- hotel offers cached: {}", result.hotels_cached));
        lines.push(format!("- deactivated: {}", result.deals_deactivated));
        lines.push(format!("- errors: {}", result.errors.len()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    #[tokio::test]
    async fn reports_are_written_and_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).single().unwrap();

        let mut older = RunResult::new(t0);
        older.deals_stored = 2;
        let mut newer = RunResult::new(t0 + TimeDelta::hours(6));
        newer.deals_stored = 5;
        newer.errors.push("upstream hotel-api failed: timeout".into());

        let written = write_run_report(dir.path(), &older).await.unwrap();
        write_run_report(dir.path(), &newer).await.unwrap();
        assert!(written.join(RUN_BRIEF_FILE).exists());

        std::fs::create_dir(dir.path().join("stray")).unwrap();

        let md = recent_runs_markdown(dir.path(), 1).unwrap();
        assert!(md.contains(&newer.run_id.to_string()));
        assert!(!md.contains(&older.run_id.to_string()));
        assert!(md.contains("- deals: 5 stored of 0 found"));
        assert!(md.contains("- errors: 1"));
    }
}
