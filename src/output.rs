use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use itertools::Itertools;
use serde::Serialize;

use crate::matrix::SurfaceInfo;
use crate::postprocess::PostReport;
use crate::result::{Factors, ViewFactorResult};
use crate::stats::Counters;


/// Name of the view factor matrix file.
pub const MATRIX_FILE: &str = "viewfactors.txt";
/// Name of the run summary file.
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Serialize)]
struct Summary<'a> {
    title: &'a str,
    generated: String,
    dimension: usize,
    surfaces: &'a [SurfaceInfo],
    row_sums: Vec<f64>,
    counters: &'a Counters,
    post: Option<&'a PostReport>,
    volume: Option<f64>,
    non_converged: &'a [(usize, usize)],
    elapsed_seconds: f64,
}

/// Writes the matrix and the summary into `dir`, creating it if needed.
pub fn writeup(result: &ViewFactorResult, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    write_matrix(result, &dir.join(MATRIX_FILE))?;
    write_summary(result, &dir.join(SUMMARY_FILE))?;
    Ok(())
}

/// Writes `F[n][m]`, one row per line, prefixed by the input number of `n`.
pub fn write_matrix(result: &ViewFactorResult, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "# {}", result.title)?;
    writeln!(writer, "# generated {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(
        writer,
        "# area {}",
        result.surfaces.iter().map(|s| format!("{:e}", s.area)).join(" ")
    )?;
    writeln!(
        writer,
        "# emit {}",
        result.surfaces.iter().map(|s| s.emit).join(" ")
    )?;

    let rows: Vec<usize> = match &result.factors {
        Factors::Matrix(_) => (0..result.surfaces.len()).collect(),
        Factors::Row { row, .. } => vec![*row],
    };
    for n in rows {
        writeln!(
            writer,
            "{} {}",
            result.surfaces[n].number,
            (0..result.surfaces.len())
                .map(|m| format!("{:.6e}", result.factor(n, m)))
                .join(" ")
        )?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary(result: &ViewFactorResult, path: &Path) -> Result<()> {
    let summary = Summary {
        title: &result.title,
        generated: Local::now().to_rfc3339(),
        dimension: result.dimension,
        surfaces: &result.surfaces,
        row_sums: result.row_sums(),
        counters: &result.counters,
        post: result.post.as_ref(),
        volume: result.volume,
        non_converged: &result.non_converged,
        elapsed_seconds: result.elapsed.as_secs_f64(),
    };
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    Ok(())
}
