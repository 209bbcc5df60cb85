//! Export: index series and classification results as CSV and JSON.
//!
//! Formats:
//! - **Index CSV**: `date,index_value,constituent_count,total_market_cap`
//! - **Constituents CSV**: `date,rank,coin_id,weight,market_cap,price`, one
//!   row per constituent per day
//! - **JSON**: the full series including parameters and input fingerprint
//! - **Classification CSV**: one verdict per coin

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coinindex_core::classification::Verdict;
use coinindex_core::domain::IndexSeries;

use crate::report::UpdateReport;

// ─── Index series ───────────────────────────────────────────────────

pub fn export_index_csv(series: &IndexSeries) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "index_value", "constituent_count", "total_market_cap"])?;
    for p in &series.points {
        wtr.write_record([
            p.date.to_string(),
            format!("{:.6}", p.value),
            p.constituents.len().to_string(),
            format!("{:.2}", p.total_market_cap),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_constituents_csv(series: &IndexSeries) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "rank", "coin_id", "weight", "market_cap", "price"])?;
    for p in &series.points {
        for c in &p.constituents {
            wtr.write_record([
                p.date.to_string(),
                c.rank.to_string(),
                c.coin_id.clone(),
                format!("{:.10}", c.weight),
                format!("{:.2}", c.market_cap),
                c.price.to_string(),
            ])?;
        }
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_index_json(series: &IndexSeries) -> Result<String> {
    serde_json::to_string_pretty(series).context("failed to serialize IndexSeries to JSON")
}

/// Write the artifact set for one index run.
///
/// Creates `index_{start}_{end}_{timestamp}/` under `output_dir` containing
/// `index.csv`, `constituents.csv` and `series.json`. Returns the directory.
pub fn save_index_artifacts(series: &IndexSeries, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!(
        "index_{}_{}_{}",
        series.params.start_date,
        series.params.end_date,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    write(&run_dir.join("index.csv"), &export_index_csv(series)?)?;
    write(
        &run_dir.join("constituents.csv"),
        &export_constituents_csv(series)?,
    )?;
    write(&run_dir.join("series.json"), &export_index_json(series)?)?;

    Ok(run_dir)
}

// ─── Classification ─────────────────────────────────────────────────

/// Columns: coin_id, classification, is_stablecoin, is_wrapped, confidence,
/// stablecoin_tags, wrapped_tags, narrowed_by. Tag lists are `;`-joined.
pub fn export_classification_csv(verdicts: &[Verdict]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "coin_id",
        "classification",
        "is_stablecoin",
        "is_wrapped",
        "confidence",
        "stablecoin_tags",
        "wrapped_tags",
        "narrowed_by",
    ])?;
    for v in verdicts {
        wtr.write_record([
            v.coin_id.clone(),
            v.label().to_string(),
            v.is_stablecoin.to_string(),
            v.is_wrapped.to_string(),
            format!("{:?}", v.confidence).to_lowercase(),
            v.stablecoin_tags.join(";"),
            v.wrapped_tags.join(";"),
            v.narrowed.clone().unwrap_or_default(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Update report ──────────────────────────────────────────────────

/// Write an update report as `update_{run_date}_{timestamp}.json`.
pub fn save_update_report(report: &UpdateReport, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create report dir: {}", output_dir.display()))?;
    let path = output_dir.join(format!(
        "update_{}_{}.json",
        report.run_date,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    let json = report.to_json().context("failed to serialize UpdateReport")?;
    write(&path, &json)?;
    Ok(path)
}

fn write(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
