use anyhow::{Context, Result};
use kyutai_stt_loadgen::RunOutcome;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const CSV_HEADER: &str = "total_req,resp_time,drop_count,avg_delay,err";

/// Renders one row per session result, in session order. `total_req` is the
/// requested session count of the run.
pub fn render_csv(outcome: &RunOutcome) -> String {
    let mut out = String::with_capacity(64 * (outcome.results.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for res in &outcome.results {
        let _ = writeln!(
            out,
            "{},{:.6},{},{:.6},{}",
            outcome.requested,
            res.elapsed.as_secs_f64(),
            res.samples,
            res.average_delay.as_secs_f64(),
            escape_field(res.error_text()),
        );
    }
    out
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Stores a copy of the report under `dir` with a time-ordered unique name.
pub async fn write_report_file(dir: &Path, csv: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.csv", uuid::Uuid::now_v7()));
    tokio::fs::write(&path, csv)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
