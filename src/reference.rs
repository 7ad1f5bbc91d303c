//! Reference scores taken from published papers.
//!
//! The CSV is wide: a `scenario` column followed by one column per model, with
//! percentage scores or empty cells.

use crate::error::EvalError;
use crate::models::ScoreRecord;
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTable {
    pub models: Vec<String>,
    /// Scenario name with one optional score per model
    pub rows: Vec<(String, Vec<Option<f64>>)>,
}

impl ReferenceTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open reference table: {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Failed to parse reference table: {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().context("Missing header row")?.clone();
        match headers.get(0) {
            Some("scenario") => {}
            other => anyhow::bail!("First column must be 'scenario', found {:?}", other),
        }
        let models: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("CSV parse error at row {idx}"))?;
            let scenario = record.get(0).unwrap_or_default().to_string();
            let scores = models
                .iter()
                .enumerate()
                .map(|(col, model)| parse_cell(&scenario, model, record.get(col + 1)))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push((scenario, scores));
        }

        Ok(Self { models, rows })
    }

    /// Long-form records, model-major, with empty cells dropped
    pub fn melt(&self) -> Vec<ScoreRecord> {
        self.models
            .iter()
            .enumerate()
            .flat_map(|(col, model)| {
                self.rows.iter().filter_map(move |(scenario, scores)| {
                    scores[col].map(|score| ScoreRecord::new(model, scenario, score))
                })
            })
            .collect()
    }
}

fn parse_cell(scenario: &str, model: &str, cell: Option<&str>) -> Result<Option<f64>, EvalError> {
    let value = match cell {
        None | Some("") => return Ok(None),
        Some(value) => value,
    };

    match value.parse::<f64>() {
        Ok(score) if score.is_nan() => Ok(None),
        Ok(score) if score.is_finite() => Ok(Some(score)),
        _ => Err(EvalError::InvalidReferenceCell {
            scenario: scenario.to_string(),
            model: model.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResultTable;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CSV: &str = "scenario,Llama-3-8B,Mistral-7B,Gemma-7B\n\
                       MMLU,66.6,62.5,\n\
                       GSM8K,,37.8,46.4\n\
                       Hellaswag,82.0,81.0,82.2\n";

    #[test]
    fn test_melt_drops_empty_cells() {
        let table = ReferenceTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.models.len(), 3);

        let records = table.melt();
        assert_eq!(records.len(), 7);
        assert_eq!(records[0], ScoreRecord::new("Llama-3-8B", "MMLU", 66.6));
        assert_eq!(records[1], ScoreRecord::new("Llama-3-8B", "Hellaswag", 82.0));
        assert!(!records.iter().any(|r| r.model == "Gemma-7B" && r.scenario == "MMLU"));
    }

    #[test]
    fn test_melt_then_pivot_round_trip() {
        let table = ReferenceTable::from_reader(CSV.as_bytes()).unwrap();
        let pivoted = ResultTable::pivot(&table.melt()).unwrap();

        for (scenario, scores) in &table.rows {
            for (model, score) in table.models.iter().zip(scores) {
                assert_eq!(pivoted.get(model, scenario), *score, "{model}/{scenario}");
            }
        }
        assert_eq!(pivoted.to_records().len(), table.melt().len());
    }

    #[test]
    fn test_invalid_cell_is_error() {
        let csv = "scenario,m\nMMLU,n/a\n";
        let err = ReferenceTable::from_reader(csv.as_bytes()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("MMLU"));
        assert!(message.contains("n/a"));
    }

    #[test]
    fn test_infinite_cell_is_error() {
        for value in ["inf", "-infinity", "1e999"] {
            let csv = format!("scenario,m\nGSM8K,{value}\n");
            let err = ReferenceTable::from_reader(csv.as_bytes()).unwrap_err();
            assert!(format!("{err:#}").contains("is not a number"), "{value}");
        }
    }

    #[test]
    fn test_nan_cell_is_empty() {
        let table = ReferenceTable::from_reader("scenario,m\nGSM8K,NaN\n".as_bytes()).unwrap();
        assert!(table.melt().is_empty());
    }

    #[test]
    fn test_first_column_must_be_scenario() {
        let csv = "task,m\nMMLU,1.0\n";
        assert!(ReferenceTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_from_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", CSV).unwrap();

        let table = ReferenceTable::from_path(temp_file.path()).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert!(ReferenceTable::from_path(Path::new("/nonexistent.csv")).is_err());
    }
}
