use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Metric name to raw value for one harness task
pub type TaskMetrics = BTreeMap<String, Value>;

/// One evaluation run as written by the benchmark harness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultArtifact {
    /// Model identifier the run was made with
    pub model_name: String,
    /// Task name to metrics
    pub results: BTreeMap<String, TaskMetrics>,
}

/// A single (model, scenario, score) observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub model: String,
    pub scenario: String,
    pub score: f64,
}

impl ScoreRecord {
    pub fn new(model: impl Into<String>, scenario: impl Into<String>, score: f64) -> Self {
        Self {
            model: model.into(),
            scenario: scenario.into(),
            score,
        }
    }
}

/// Scores of one model keyed by scenario column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub model: String,
    pub scores: BTreeMap<String, f64>,
}

/// Wide model x scenario table; absent cells mean no run covered the pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// Scenario columns in sorted order
    pub scenarios: Vec<String>,
    /// One row per model, sorted by model
    pub rows: Vec<ModelRow>,
}

impl ResultTable {
    /// Pivot long-form records into one row per model and one column per scenario
    pub fn pivot(records: &[ScoreRecord]) -> Result<Self, EvalError> {
        let mut rows: BTreeMap<&str, BTreeMap<String, f64>> = BTreeMap::new();
        let mut scenarios = BTreeSet::new();

        for record in records {
            let cells = rows.entry(record.model.as_str()).or_default();
            if cells.insert(record.scenario.clone(), record.score).is_some() {
                return Err(EvalError::DuplicateCell {
                    model: record.model.clone(),
                    scenario: record.scenario.clone(),
                });
            }
            scenarios.insert(record.scenario.clone());
        }

        Ok(Self {
            scenarios: scenarios.into_iter().collect(),
            rows: rows
                .into_iter()
                .map(|(model, scores)| ModelRow {
                    model: model.to_string(),
                    scores,
                })
                .collect(),
        })
    }

    /// Flat column names: the `model` identity column followed by every scenario
    pub fn columns(&self) -> Vec<&str> {
        std::iter::once("model")
            .chain(self.scenarios.iter().map(String::as_str))
            .collect()
    }

    #[cfg(test)]
    pub fn get(&self, model: &str, scenario: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.model == model)
            .and_then(|row| row.scores.get(scenario).copied())
    }

    /// Melt back to long form, dropping absent cells
    #[cfg(test)]
    pub fn to_records(&self) -> Vec<ScoreRecord> {
        self.rows
            .iter()
            .flat_map(|row| {
                row.scores
                    .iter()
                    .map(|(scenario, score)| ScoreRecord::new(&row.model, scenario, *score))
            })
            .collect()
    }
}
