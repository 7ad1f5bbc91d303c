use crate::config::AggregationConfig;
use crate::error::EvalError;
use crate::models::{ResultArtifact, ScoreRecord, TaskMetrics};
use crate::normalization::{METRIC_QUALIFIER, Normalizer};
use tracing::debug;

/// Turns result artifacts into [0, 1]-scale score records
pub struct Extractor<'a> {
    config: &'a AggregationConfig,
    normalizer: Normalizer<'a>,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a AggregationConfig) -> Self {
        Self {
            config,
            normalizer: Normalizer::new(&config.composites, &config.leaderboard_prefix),
        }
    }

    /// Leaderboard-v2 artifacts carry the namespace in their task names
    pub fn is_leaderboard(&self, artifact: &ResultArtifact) -> bool {
        artifact
            .results
            .keys()
            .any(|task| task.contains(&self.config.leaderboard_prefix))
    }

    pub fn extract(&self, artifact: &ResultArtifact) -> Result<Vec<ScoreRecord>, EvalError> {
        if self.is_leaderboard(artifact) {
            self.extract_normalized(artifact)
        } else {
            self.extract_direct(artifact)
        }
    }

    fn extract_normalized(&self, artifact: &ResultArtifact) -> Result<Vec<ScoreRecord>, EvalError> {
        let mut records = Vec::new();

        for composite in self.normalizer.composites() {
            let scenario = composite.name.as_str();
            let unscored = artifact
                .results
                .get(&self.normalizer.task_key(scenario))
                .is_some_and(|payload| payload.contains_key(&self.config.sentinel_key));
            if unscored {
                debug!(model = %artifact.model_name, scenario, "Skipping composite without a score");
                continue;
            }

            if !artifact.results.keys().any(|task| task.contains(scenario)) {
                continue;
            }

            let score = self.normalizer.normalize(scenario, &artifact.results)?;
            records.push(ScoreRecord::new(&artifact.model_name, scenario, score / 100.0));
        }

        Ok(records)
    }

    fn extract_direct(&self, artifact: &ResultArtifact) -> Result<Vec<ScoreRecord>, EvalError> {
        let mut records = Vec::new();

        for (scenario, metrics) in &artifact.results {
            // aggregate groups have no expected metric
            let Some(metric) = self.config.expected_metric(scenario) else {
                continue;
            };

            let score = single_metric(&artifact.model_name, scenario, metrics, metric)?;
            records.push(ScoreRecord::new(&artifact.model_name, scenario, score));
        }

        Ok(records)
    }
}

fn strip_qualifier(key: &str) -> &str {
    key.strip_suffix(METRIC_QUALIFIER).unwrap_or(key)
}

/// The one non-stderr metric key matching `metric`
fn single_metric(
    model: &str,
    scenario: &str,
    metrics: &TaskMetrics,
    metric: &str,
) -> Result<f64, EvalError> {
    let candidates: Vec<&String> = metrics
        .keys()
        .filter(|key| strip_qualifier(key) == metric && !key.contains("stderr"))
        .collect();

    let [key] = candidates.as_slice() else {
        return Err(EvalError::AmbiguousMetric {
            model: model.to_string(),
            scenario: scenario.to_string(),
            metric: metric.to_string(),
            candidates: candidates.iter().map(|key| key.to_string()).collect(),
        });
    };

    metrics[*key].as_f64().ok_or_else(|| EvalError::NonNumericMetric {
        task: scenario.to_string(),
        metric: (*key).clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(value: serde_json::Value) -> ResultArtifact {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_direct_extraction() {
        let config = AggregationConfig::default();
        let extractor = Extractor::new(&config);
        let artifact = artifact(json!({
            "model_name": "org/m",
            "results": {
                "hellaswag": {"acc,none": 0.5, "acc_norm,none": 0.6, "acc_norm_stderr,none": 0.01},
                "mmlu": {"acc,none": 0.45},
                "mmlu_anatomy": {"acc,none": 0.4, "acc_stderr,none": 0.02, "alias": " - anatomy"},
                "gsm8k": {"exact_match,strict-match": 0.3, "exact_match,flexible-extract": 0.35},
                "unknown_task": {"acc,none": 0.9}
            }
        }));

        let records = extractor.extract(&artifact).unwrap();
        assert_eq!(
            records,
            vec![
                ScoreRecord::new("org/m", "gsm8k", 0.3),
                ScoreRecord::new("org/m", "hellaswag", 0.6),
                ScoreRecord::new("org/m", "mmlu_anatomy", 0.4),
            ]
        );
    }

    #[test]
    fn test_direct_extraction_requires_single_metric() {
        let config = AggregationConfig::default();
        let extractor = Extractor::new(&config);

        let missing = artifact(json!({
            "model_name": "m",
            "results": {"winogrande": {"f1,none": 0.5}}
        }));
        let err = extractor.extract(&missing).unwrap_err();
        assert!(matches!(err, EvalError::AmbiguousMetric { candidates, .. } if candidates.is_empty()));

        let doubled = artifact(json!({
            "model_name": "m",
            "results": {"winogrande": {"acc,none": 0.5, "acc": 0.5}}
        }));
        let err = extractor.extract(&doubled).unwrap_err();
        assert!(matches!(err, EvalError::AmbiguousMetric { candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn test_leaderboard_extraction_is_normalized() {
        let config = AggregationConfig::default();
        let extractor = Extractor::new(&config);
        let artifact = artifact(json!({
            "model_name": "org/m",
            "results": {
                "leaderboard_gpqa": {"acc_norm,none": 0.4},
                "leaderboard_musr_murder_mysteries": {"acc_norm,none": 0.75},
                "leaderboard_ifeval": {" ": " "}
            }
        }));

        assert!(extractor.is_leaderboard(&artifact));
        let records = extractor.extract(&artifact).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].scenario, "musr");
        assert!((records[0].score - 0.5).abs() < 1e-9);
        assert_eq!(records[1].scenario, "gpqa");
        assert!((records[1].score - 0.2).abs() < 1e-9);
    }
}
