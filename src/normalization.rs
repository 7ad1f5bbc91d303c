//! Chance-corrected normalization for leaderboard-v2 composite scenarios.
//!
//! Raw accuracies are mapped onto a 0-100 scale where random guessing scores 0:
//! `max(raw - floor, 0) / (ceiling - floor) * 100`, with `floor = 1 / choices`.

use crate::error::EvalError;
use crate::models::TaskMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Qualifier the harness appends to metric keys
pub const METRIC_QUALIFIER: &str = ",none";

/// A subtask of a composite scenario with its number of answer choices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub name: String,
    pub choices: u32,
}

/// How a composite scenario reduces its raw metrics to one score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositeKind {
    /// Mean of per-subtask chance-corrected scores
    ChanceCorrectedSubtasks { metric: String, subtasks: Vec<Subtask> },
    /// One metric corrected for `choices`-way guessing
    ChanceCorrected { metric: String, choices: u32 },
    /// One metric with no guessing floor
    Unbounded { metric: String },
    /// Mean of two metrics, each scaled to percent
    DualAverage { first: String, second: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScenario {
    pub name: String,
    #[serde(flatten)]
    pub kind: CompositeKind,
}

impl CompositeScenario {
    fn new(name: &str, kind: CompositeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

fn subtasks(entries: &[(&str, u32)]) -> Vec<Subtask> {
    entries
        .iter()
        .map(|(name, choices)| Subtask {
            name: name.to_string(),
            choices: *choices,
        })
        .collect()
}

/// The open LLM leaderboard v2 suite
pub fn leaderboard_v2() -> Vec<CompositeScenario> {
    vec![
        CompositeScenario::new(
            "bbh",
            CompositeKind::ChanceCorrectedSubtasks {
                metric: "acc_norm".to_string(),
                subtasks: subtasks(&[
                    ("sports_understanding", 2),
                    ("tracking_shuffled_objects_three_objects", 3),
                    ("navigate", 2),
                    ("snarks", 2),
                    ("date_understanding", 6),
                    ("reasoning_about_colored_objects", 18),
                    ("object_counting", 19),
                    ("logical_deduction_seven_objects", 7),
                    ("geometric_shapes", 11),
                    ("web_of_lies", 2),
                    ("movie_recommendation", 6),
                    ("logical_deduction_five_objects", 5),
                    ("salient_translation_error_detection", 6),
                    ("disambiguation_qa", 3),
                    ("temporal_sequences", 4),
                    ("hyperbaton", 2),
                    ("logical_deduction_three_objects", 3),
                    ("causal_judgement", 2),
                    ("formal_fallacies", 2),
                    ("tracking_shuffled_objects_seven_objects", 7),
                    ("ruin_names", 6),
                    ("penguins_in_a_table", 5),
                    ("boolean_expressions", 2),
                    ("tracking_shuffled_objects_five_objects", 5),
                ]),
            },
        ),
        CompositeScenario::new(
            "musr",
            CompositeKind::ChanceCorrectedSubtasks {
                metric: "acc_norm".to_string(),
                subtasks: subtasks(&[
                    ("murder_mysteries", 2),
                    ("object_placements", 5),
                    ("team_allocation", 3),
                ]),
            },
        ),
        CompositeScenario::new(
            "mmlu_pro",
            CompositeKind::ChanceCorrected {
                metric: "acc".to_string(),
                choices: 10,
            },
        ),
        CompositeScenario::new(
            "gpqa",
            CompositeKind::ChanceCorrected {
                metric: "acc_norm".to_string(),
                choices: 4,
            },
        ),
        CompositeScenario::new(
            "math_hard",
            CompositeKind::Unbounded {
                metric: "exact_match".to_string(),
            },
        ),
        CompositeScenario::new(
            "ifeval",
            CompositeKind::DualAverage {
                first: "inst_level_strict_acc".to_string(),
                second: "prompt_level_strict_acc".to_string(),
            },
        ),
    ]
}

/// Linear rescale onto 0-100; values under the floor clip to 0
pub fn rescale(value: f64, floor: f64, ceiling: f64) -> f64 {
    (value - floor).max(0.0) / (ceiling - floor) * 100.0
}

fn chance_floor(choices: u32) -> f64 {
    1.0 / choices as f64
}

/// Read one metric from a task, accepting the qualified or bare key
pub fn lookup_metric(task: &str, metrics: &TaskMetrics, metric: &str) -> Result<f64, EvalError> {
    let value = metrics
        .get(&format!("{metric}{METRIC_QUALIFIER}"))
        .or_else(|| metrics.get(metric))
        .ok_or_else(|| EvalError::MissingMetric {
            task: task.to_string(),
            metric: metric.to_string(),
        })?;

    value.as_f64().ok_or_else(|| EvalError::NonNumericMetric {
        task: task.to_string(),
        metric: metric.to_string(),
    })
}

/// Computes composite scores from a leaderboard-style results mapping
pub struct Normalizer<'a> {
    composites: &'a [CompositeScenario],
    task_prefix: String,
}

impl<'a> Normalizer<'a> {
    /// `namespace` is the leaderboard prefix; task keys read as `<namespace>_<scenario>`
    pub fn new(composites: &'a [CompositeScenario], namespace: &str) -> Self {
        Self {
            composites,
            task_prefix: format!("{namespace}_"),
        }
    }

    pub fn composites(&self) -> &'a [CompositeScenario] {
        self.composites
    }

    /// Key of the top-level task holding a scenario's payload
    pub fn task_key(&self, scenario: &str) -> String {
        format!("{}{}", self.task_prefix, scenario)
    }

    /// Normalized 0-100 score of `scenario`
    pub fn normalize(
        &self,
        scenario: &str,
        results: &BTreeMap<String, TaskMetrics>,
    ) -> Result<f64, EvalError> {
        let composite = self
            .composites
            .iter()
            .find(|c| c.name == scenario)
            .ok_or_else(|| EvalError::UnknownComposite(scenario.to_string()))?;

        match &composite.kind {
            CompositeKind::ChanceCorrectedSubtasks { metric, subtasks } => {
                let mut scores = Vec::with_capacity(subtasks.len());
                for subtask in subtasks {
                    let key = format!("{}_{}", self.task_key(scenario), subtask.name);
                    let Some(metrics) = results.get(&key) else {
                        continue;
                    };
                    let raw = lookup_metric(&key, metrics, metric)?;
                    scores.push(rescale(raw, chance_floor(subtask.choices), 1.0));
                }

                if scores.is_empty() {
                    return Err(EvalError::NoSubtaskScores(scenario.to_string()));
                }
                Ok(scores.iter().sum::<f64>() / scores.len() as f64)
            }
            CompositeKind::ChanceCorrected { metric, choices } => {
                let raw = self.single_metric(scenario, results, metric)?;
                Ok(rescale(raw, chance_floor(*choices), 1.0))
            }
            CompositeKind::Unbounded { metric } => {
                let raw = self.single_metric(scenario, results, metric)?;
                Ok(rescale(raw, 0.0, 1.0))
            }
            CompositeKind::DualAverage { first, second } => {
                let first = self.single_metric(scenario, results, first)? * 100.0;
                let second = self.single_metric(scenario, results, second)? * 100.0;
                Ok((first + second) / 2.0)
            }
        }
    }

    fn single_metric(
        &self,
        scenario: &str,
        results: &BTreeMap<String, TaskMetrics>,
        metric: &str,
    ) -> Result<f64, EvalError> {
        let key = self.task_key(scenario);
        let metrics = results.get(&key).ok_or_else(|| EvalError::MissingMetric {
            task: key.clone(),
            metric: metric.to_string(),
        })?;
        lookup_metric(&key, metrics, metric)
    }
}
