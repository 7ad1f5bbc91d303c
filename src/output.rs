use crate::models::ResultTable;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
    Csv,
}

/// Print the comparison table in the specified format
pub fn print_results(table: &ResultTable, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Plain => render_plain(table),
        OutputFormat::Json => render_json(table)?,
        OutputFormat::Csv => render_csv(table)?,
    };
    print!("{}", rendered);
    Ok(())
}

/// Fixed-width grid, scores to 2 decimals, `-` for absent cells
fn render_plain(table: &ResultTable) -> String {
    if table.rows.is_empty() {
        return "No results available.\n".to_string();
    }

    let model_width = table
        .rows
        .iter()
        .map(|row| row.model.len())
        .chain(std::iter::once("model".len()))
        .max()
        .unwrap_or_default();
    let widths: Vec<usize> = table.scenarios.iter().map(|s| s.len().max(8)).collect();

    let mut out = format!("{:<model_width$}", "model");
    for (scenario, width) in table.scenarios.iter().zip(&widths) {
        out.push_str(&format!("  {:>width$}", scenario));
    }
    out.push('\n');
    out.push_str(&"-".repeat(model_width + widths.iter().map(|w| w + 2).sum::<usize>()));
    out.push('\n');

    for row in &table.rows {
        out.push_str(&format!("{:<model_width$}", row.model));
        for (scenario, width) in table.scenarios.iter().zip(&widths) {
            let cell = match row.scores.get(scenario) {
                Some(score) => format!("{:.2}", score),
                None => "-".to_string(),
            };
            out.push_str(&format!("  {:>width$}", cell));
        }
        out.push('\n');
    }

    out
}

fn render_json(table: &ResultTable) -> Result<String> {
    let json = serde_json::to_string_pretty(&table.rows).context("Failed to serialize results to JSON")?;
    Ok(format!("{}\n", json))
}

fn write_csv<W: Write>(table: &ResultTable, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(table.columns())?;

    for row in &table.rows {
        let mut record = vec![row.model.clone()];
        record.extend(
            table
                .scenarios
                .iter()
                .map(|s| row.scores.get(s).map(f64::to_string).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}

fn render_csv(table: &ResultTable) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(table, &mut buffer)?;
    String::from_utf8(buffer).context("CSV output is not valid UTF-8")
}

/// Write the table as CSV, creating parent directories as needed
pub fn save_csv(table: &ResultTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to write results to: {}", path.display()))?;
    write_csv(table, file)?;
    tracing::info!(path = %path.display(), "Results stored");
    Ok(())
}
