use crate::config::{AggregationConfig, PrefixRewrite, Umbrella};
use crate::duplicates::resolve_duplicates;
use crate::error::EvalError;
use crate::extraction::Extractor;
use crate::models::{ResultArtifact, ResultTable, ScoreRecord};
use crate::pretty_names::PrettyNames;
use crate::ranking::mean_win_rates;
use crate::reference::ReferenceTable;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name pattern of harness result artifacts
pub const ARTIFACT_PATTERN: &str = "results_*";

/// Every `results_*.json` file under each root, sorted within a root.
///
/// Other `results_*` files, such as the reference CSV, are not artifacts.
pub fn discover_artifacts(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut all = Vec::new();

    for root in roots {
        let pattern = format!(
            "{}/**/{}",
            glob::Pattern::escape(&root.to_string_lossy()),
            ARTIFACT_PATTERN
        );
        let mut found = Vec::new();
        for entry in glob::glob(&pattern).with_context(|| format!("Invalid glob pattern '{pattern}'"))? {
            let path = entry.context("Failed to read directory entry")?;
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                found.push(path);
            }
        }

        if found.is_empty() {
            warn!(root = %root.display(), "No result artifacts found");
        }
        found.sort();
        all.extend(found);
    }

    Ok(all)
}

/// Parse one harness result file
pub fn load_artifact(path: &Path) -> Result<ResultArtifact> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read result artifact: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse result artifact: {}", path.display()))
}

/// Fold subtask scenarios into their umbrella and average each (model, scenario)
pub fn consolidate_subtasks(records: Vec<ScoreRecord>, umbrellas: &[Umbrella]) -> Vec<ScoreRecord> {
    let mut groups: BTreeMap<(String, String), (f64, usize)> = BTreeMap::new();

    for record in records {
        let scenario = umbrellas
            .iter()
            .find(|u| u.covers(&record.scenario))
            .map_or(record.scenario, |u| u.name.clone());
        let entry = groups.entry((record.model, scenario)).or_insert((0.0, 0));
        entry.0 += record.score;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((model, scenario), (sum, count))| ScoreRecord::new(model, scenario, sum / count as f64))
        .collect()
}

/// Apply the first matching prefix rewrite to a model identifier
pub fn rewrite_model(model: &str, rewrites: &[PrefixRewrite]) -> String {
    for rewrite in rewrites {
        if let Some(rest) = model.strip_prefix(rewrite.from.as_str()) {
            return format!("{}{}", rewrite.to, rest);
        }
    }
    model.to_string()
}

fn round2(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Builds the model x scenario comparison table
pub struct Aggregator<'a> {
    config: &'a AggregationConfig,
    names: PrettyNames,
}

impl<'a> Aggregator<'a> {
    /// Aggregator over `config`, with its display-name overrides applied
    pub fn new(config: &'a AggregationConfig) -> Self {
        Self {
            config,
            names: PrettyNames::new(&config.display_names),
        }
    }

    /// Full pipeline over result directories and the reference CSV
    pub fn run(&self, result_dirs: &[PathBuf], reference_path: &Path) -> Result<ResultTable> {
        let harness = self.collect_scores(result_dirs)?;
        let reference = ReferenceTable::from_path(reference_path)?.melt();
        info!(
            harness = harness.len(),
            reference = reference.len(),
            "Merging harness and reference scores"
        );

        Ok(self.finalize(harness, reference)?)
    }

    /// Extract [0, 1]-scale records from every artifact, duplicates resolved
    pub fn collect_scores(&self, result_dirs: &[PathBuf]) -> Result<Vec<ScoreRecord>> {
        let paths = discover_artifacts(result_dirs)?;
        info!(files = paths.len(), "Loading result artifacts");

        let artifacts = paths
            .par_iter()
            .map(|path| load_artifact(path).map(|artifact| (path, artifact)))
            .collect::<Result<Vec<_>>>()?;

        let extractor = Extractor::new(self.config);
        let mut records = Vec::new();
        for (path, artifact) in &artifacts {
            let extracted = extractor
                .extract(artifact)
                .with_context(|| format!("Failed to extract scores from {}", path.display()))?;
            debug!(path = %path.display(), records = extracted.len(), "Extracted scores");
            records.extend(extracted);
        }

        Ok(resolve_duplicates(records)?)
    }

    /// Consolidate, rescale, merge with the reference scores and rank
    pub fn finalize(
        &self,
        harness: Vec<ScoreRecord>,
        reference: Vec<ScoreRecord>,
    ) -> Result<ResultTable, EvalError> {
        let mut records: Vec<ScoreRecord> = consolidate_subtasks(harness, &self.config.umbrellas)
            .into_iter()
            .map(|r| ScoreRecord::new(r.model, self.names.get(&r.scenario), r.score * 100.0))
            .collect();
        records.extend(reference);

        let mut records: Vec<ScoreRecord> = resolve_duplicates(records)?
            .into_iter()
            .map(|r| {
                let model = rewrite_model(&r.model, &self.config.model_prefix_rewrites);
                ScoreRecord::new(model, r.scenario, round2(r.score))
            })
            .collect();

        let mwr = mean_win_rates(&records)?;
        records.extend(mwr);

        ResultTable::pivot(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::MWR_SCENARIO;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn write_artifact(path: PathBuf, value: serde_json::Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("missing cell");
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_consolidation_folds_subtasks_only() {
        let umbrellas = AggregationConfig::default().umbrellas;
        let records = vec![
            ScoreRecord::new("m", "mmlu_high_school_math", 80.0),
            ScoreRecord::new("m", "mmlu_world_religions", 60.0),
            ScoreRecord::new("m", "mmlu_pro", 50.0),
        ];

        let consolidated = consolidate_subtasks(records, &umbrellas);
        assert_eq!(
            consolidated,
            vec![ScoreRecord::new("m", "mmlu", 70.0), ScoreRecord::new("m", "mmlu_pro", 50.0)]
        );
    }

    #[test]
    fn test_rewrite_model_prefix() {
        let rewrites = vec![PrefixRewrite {
            from: "/dccstor/models/".to_string(),
            to: "ibm-fms/".to_string(),
        }];
        assert_eq!(rewrite_model("/dccstor/models/Bamba-9B", &rewrites), "ibm-fms/Bamba-9B");
        assert_eq!(rewrite_model("meta/llama", &rewrites), "meta/llama");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(70.00000000000001), 70.0);
        assert_eq!(round2(12.345678), 12.35);
    }

    #[test]
    fn test_discover_artifacts_recursive() {
        let dir = tempdir().unwrap();
        write_artifact(dir.path().join("b/results_2.json"), json!({}));
        write_artifact(dir.path().join("a/deep/results_1.json"), json!({}));
        write_artifact(dir.path().join("a/samples_1.json"), json!({}));

        let found = discover_artifacts(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a/deep/results_1.json"));
        assert!(found[1].ends_with("b/results_2.json"));
    }

    #[test]
    fn test_reference_csv_beside_results_is_not_an_artifact() {
        let dir = tempdir().unwrap();
        let out = dir.path().to_path_buf();
        write_artifact(
            out.join("Bamba_eval/m/results_a.json"),
            json!({"model_name": "m", "results": {"winogrande": {"acc,none": 0.5}}}),
        );
        write_artifact(
            out.join("Bamba_eval/m/results_b.json"),
            json!({"model_name": "n", "results": {"winogrande": {"acc,none": 0.7}}}),
        );
        let reference = out.join("results_from_papers.csv");
        fs::write(&reference, "scenario,ref-model\nWinogrande,60.0\n").unwrap();

        let found = discover_artifacts(std::slice::from_ref(&out)).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().is_some_and(|ext| ext == "json")));

        let config = AggregationConfig::default();
        let table = Aggregator::new(&config).run(&[out], &reference).unwrap();
        assert_close(table.get("m", "Winogrande"), 50.0);
        assert_close(table.get("n", "Winogrande"), 70.0);
        assert_close(table.get("ref-model", "Winogrande"), 60.0);
    }

    #[test]
    fn test_full_pipeline() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("run_one");
        let second = dir.path().join("run_two");

        write_artifact(
            first.join("model_a/2024/results_direct.json"),
            json!({
                "model_name": "/models/a",
                "results": {
                    "hellaswag": {"acc_norm,none": 0.8, "acc_norm_stderr,none": 0.01},
                    "mmlu_x": {"acc,none": 0.8},
                    "mmlu_y": {"acc,none": 0.6}
                }
            }),
        );
        write_artifact(
            first.join("model_a/results_lb.json"),
            json!({
                "model_name": "/models/a",
                "results": {"leaderboard_gpqa": {"acc_norm,none": 0.4}}
            }),
        );
        write_artifact(
            second.join("model_b/results_1.json"),
            json!({
                "model_name": "org/b",
                "results": {
                    "hellaswag": {"acc_norm,none": 0.6},
                    "mmlu_x": {"acc,none": 0.5},
                    "mmlu_y": {"acc,none": 0.5}
                }
            }),
        );
        write_artifact(
            second.join("model_b/rerun/results_2.json"),
            json!({
                "model_name": "org/b",
                "results": {"hellaswag": {"acc_norm,none": 0.6001}}
            }),
        );
        write_artifact(
            second.join("model_b/results_3.json"),
            json!({
                "model_name": "org/b",
                "results": {"leaderboard_gpqa": {"acc_norm,none": 0.55}}
            }),
        );

        let reference = dir.path().join("results_from_papers.csv");
        fs::write(&reference, "scenario,ref-model\nMMLU,65.0\nHellaswag,70.0\nGPQA,30.0\n").unwrap();

        let mut config = AggregationConfig::default();
        config.model_prefix_rewrites = vec![PrefixRewrite {
            from: "/models/".to_string(),
            to: "ibm/".to_string(),
        }];
        let aggregator = Aggregator::new(&config);

        let table = aggregator.run(&[first, second], &reference).unwrap();
        assert_eq!(table.columns(), vec!["model", "GPQA", "Hellaswag", "MMLU", "MWR"]);
        let models: Vec<&str> = table.rows.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec!["ibm/a", "org/b", "ref-model"]);

        assert_close(table.get("ibm/a", "Hellaswag"), 80.0);
        assert_close(table.get("ibm/a", "MMLU"), 70.0);
        assert_close(table.get("ibm/a", "GPQA"), 20.0);
        assert_close(table.get("org/b", "MMLU"), 50.0);
        assert_close(table.get("org/b", "GPQA"), 40.0);
        assert_close(table.get("ref-model", "MMLU"), 65.0);

        assert_close(table.get("ibm/a", MWR_SCENARIO), 2.0 / 3.0);
        assert_close(table.get("org/b", MWR_SCENARIO), 1.0 / 3.0);
        assert_close(table.get("ref-model", MWR_SCENARIO), 0.5);
    }

    #[test]
    fn test_conflicting_runs_abort() {
        let dir = tempdir().unwrap();
        for (file, score) in [("results_1.json", 0.5), ("results_2.json", 0.6)] {
            write_artifact(
                dir.path().join(file),
                json!({"model_name": "m", "results": {"winogrande": {"acc,none": score}}}),
            );
        }

        let config = AggregationConfig::default();
        let err = Aggregator::new(&config)
            .collect_scores(&[dir.path().to_path_buf()])
            .unwrap_err();
        assert!(err.to_string().contains("Inconsistent scores"));
    }

    #[test]
    fn test_reference_conflict_aborts() {
        let config = AggregationConfig::default();
        let aggregator = Aggregator::new(&config);

        let harness = vec![
            ScoreRecord::new("m", "gsm8k", 0.40),
            ScoreRecord::new("n", "gsm8k", 0.30),
        ];
        let reference = vec![ScoreRecord::new("m", "GSM8K", 45.0)];

        let err = aggregator.finalize(harness, reference).unwrap_err();
        assert!(matches!(err, EvalError::DuplicateConflict { scenario, .. } if scenario == "GSM8K"));
    }

    #[test]
    fn test_single_model_scenario_is_degenerate() {
        let config = AggregationConfig::default();
        let aggregator = Aggregator::new(&config);

        let harness = vec![
            ScoreRecord::new("m", "gsm8k", 0.40),
            ScoreRecord::new("n", "gsm8k", 0.30),
            ScoreRecord::new("m", "toxigen", 0.50),
        ];

        let err = aggregator.finalize(harness, Vec::new()).unwrap_err();
        assert!(matches!(err, EvalError::DegenerateWinRate(s) if s == "Toxigen"));
    }
}
