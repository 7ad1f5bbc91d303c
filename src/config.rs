use crate::normalization::{CompositeScenario, leaderboard_v2};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parent scenario that absorbs `<name>_*` subtask scenarios by averaging
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Umbrella {
    pub name: String,
    /// Metric the folded subtasks are read with
    pub metric: String,
    /// Names that carry the prefix but are distinct sibling scenarios
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Umbrella {
    /// Whether `scenario` folds into this umbrella
    pub fn covers(&self, scenario: &str) -> bool {
        scenario
            .strip_prefix(self.name.as_str())
            .is_some_and(|rest| rest.starts_with('_'))
            && !self.exclude.iter().any(|e| e == scenario)
    }
}

/// Rewrites model identifiers starting with `from` to start with `to`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PrefixRewrite {
    pub from: String,
    pub to: String,
}

/// Settings for turning result artifacts into the comparison table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    /// Namespace that marks a leaderboard-v2 style artifact
    #[serde(default = "default_leaderboard_prefix")]
    pub leaderboard_prefix: String,
    /// Key whose presence in a composite payload means no score was produced
    #[serde(default = "default_sentinel_key")]
    pub sentinel_key: String,
    /// Scenario to the metric it is scored by
    #[serde(default = "default_scenario_metrics")]
    pub scenario_metrics: BTreeMap<String, String>,
    #[serde(default = "default_umbrellas")]
    pub umbrellas: Vec<Umbrella>,
    /// Extra or overriding display labels
    #[serde(default)]
    pub display_names: BTreeMap<String, String>,
    #[serde(default)]
    pub model_prefix_rewrites: Vec<PrefixRewrite>,
    #[serde(default = "leaderboard_v2")]
    pub composites: Vec<CompositeScenario>,
}

fn default_leaderboard_prefix() -> String {
    "leaderboard".to_string()
}

fn default_sentinel_key() -> String {
    " ".to_string()
}

fn default_scenario_metrics() -> BTreeMap<String, String> {
    [
        ("hellaswag", "acc_norm"),
        ("winogrande", "acc"),
        ("piqa", "acc_norm"),
        ("openbookqa", "acc_norm"),
        ("arc_challenge", "acc_norm"),
        ("truthfulqa_mc2", "acc"),
        ("gsm8k", "exact_match,strict-match"),
        ("toxigen", "acc"),
    ]
    .into_iter()
    .map(|(scenario, metric)| (scenario.to_string(), metric.to_string()))
    .collect()
}

fn default_umbrellas() -> Vec<Umbrella> {
    vec![Umbrella {
        name: "mmlu".to_string(),
        metric: "acc".to_string(),
        exclude: vec![
            "mmlu_pro".to_string(),
            "mmlu_humanities".to_string(),
            "mmlu_other".to_string(),
            "mmlu_social_sciences".to_string(),
            "mmlu_stem".to_string(),
        ],
    }]
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            leaderboard_prefix: default_leaderboard_prefix(),
            sentinel_key: default_sentinel_key(),
            scenario_metrics: default_scenario_metrics(),
            umbrellas: default_umbrellas(),
            display_names: BTreeMap::new(),
            model_prefix_rewrites: Vec::new(),
            composites: leaderboard_v2(),
        }
    }
}

impl AggregationConfig {
    /// Metric a scenario is scored by, falling back to its umbrella's metric
    pub fn expected_metric(&self, scenario: &str) -> Option<&str> {
        self.scenario_metrics
            .get(scenario)
            .map(String::as_str)
            .or_else(|| {
                self.umbrellas
                    .iter()
                    .find(|u| u.covers(scenario))
                    .map(|u| u.metric.as_str())
            })
    }
}

/// One harness invocation within a benchmark
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BenchmarkTask {
    pub task: String,
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub num_fewshot: Option<u32>,
}

/// Named suite of harness tasks submitted together
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Benchmark {
    pub name: String,
    pub tasks: Vec<BenchmarkTask>,
}

fn default_benchmarks() -> Vec<Benchmark> {
    vec![Benchmark {
        name: "HFV2".to_string(),
        tasks: vec![BenchmarkTask {
            task: "leaderboard".to_string(),
            subtasks: [
                "leaderboard_bbh",
                "leaderboard_gpqa",
                "leaderboard_ifeval",
                "leaderboard_math_hard",
                "leaderboard_mmlu_pro",
                "leaderboard_musr",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            num_fewshot: None,
        }],
    }]
}

/// Resources and harness location for cluster submissions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Directory job outputs and the runner log are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub models: Vec<String>,
    /// Benchmarks to run, by name
    #[serde(default = "default_benchmark_names")]
    pub benchmarks: Vec<String>,
    /// Restrict submissions to these subtasks; empty runs all
    #[serde(default)]
    pub only_subtasks: Vec<String>,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_gpu")]
    pub gpu: String,
    #[serde(default = "default_cores")]
    pub cores: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_python")]
    pub python_executable: String,
    /// Path to the lm-evaluation-harness checkout holding `lm_eval`
    #[serde(default = "default_harness_dir")]
    pub lmeval_path: PathBuf,
    /// Working directory jobs `cd` into before running the harness
    #[serde(default = "default_harness_dir")]
    pub harness_dir: PathBuf,
    /// Root for per-model HF caches; falls back to `XDG_CACHE_HOME`
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_fp_precision")]
    pub fp_precision: u8,
    /// Examples per task, for debugging
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub single_task_per_model: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("debug")
}

fn default_benchmark_names() -> Vec<String> {
    vec!["HFV2".to_string()]
}

fn default_memory() -> String {
    "64g".to_string()
}

fn default_gpu() -> String {
    "a100_80gb".to_string()
}

fn default_cores() -> String {
    "8+1".to_string()
}

fn default_queue() -> String {
    "nonstandard".to_string()
}

fn default_python() -> String {
    "python".to_string()
}

fn default_harness_dir() -> PathBuf {
    PathBuf::from("lm-evaluation-harness")
}

fn default_batch_size() -> u32 {
    1
}

fn default_fp_precision() -> u8 {
    16
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            models: Vec::new(),
            benchmarks: default_benchmark_names(),
            only_subtasks: Vec::new(),
            memory: default_memory(),
            gpu: default_gpu(),
            cores: default_cores(),
            queue: default_queue(),
            python_executable: default_python(),
            lmeval_path: default_harness_dir(),
            harness_dir: default_harness_dir(),
            cache_root: None,
            batch_size: default_batch_size(),
            fp_precision: default_fp_precision(),
            limit: None,
            poll_interval_secs: default_poll_interval(),
            single_task_per_model: false,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Benchmark suites available to the runner
    #[serde(default = "default_benchmarks")]
    pub benchmarks: Vec<Benchmark>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aggregation: AggregationConfig::default(),
            cluster: ClusterConfig::default(),
            benchmarks: default_benchmarks(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Load from `path` when given, otherwise use the built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn benchmark(&self, name: &str) -> Option<&Benchmark> {
        self.benchmarks.iter().find(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::CompositeKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[aggregation]
leaderboard_prefix = "lb"
display_names = { toxigen = "ToxiGen" }
model_prefix_rewrites = [{ from = "/models/", to = "org/" }]

[aggregation.scenario_metrics]
hellaswag = "acc"

[[aggregation.umbrellas]]
name = "mmlu"
metric = "acc"
exclude = ["mmlu_pro"]

[cluster]
models = ["org/a", "org/b"]
queue = "x86_24h"
fp_precision = 8
limit = 5

[[benchmarks]]
name = "HFV1"

[[benchmarks.tasks]]
task = "arc"
subtasks = ["arc_challenge"]
num_fewshot = 25
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.aggregation.leaderboard_prefix, "lb");
        assert_eq!(config.aggregation.scenario_metrics.len(), 1);
        assert_eq!(config.aggregation.display_names["toxigen"], "ToxiGen");
        assert_eq!(config.aggregation.model_prefix_rewrites[0].to, "org/");
        assert_eq!(config.cluster.models.len(), 2);
        assert_eq!(config.cluster.queue, "x86_24h");
        assert_eq!(config.cluster.fp_precision, 8);
        assert_eq!(config.cluster.limit, Some(5));
        assert_eq!(config.benchmarks[0].tasks[0].num_fewshot, Some(25));
        assert!(config.benchmark("HFV1").is_some());
        assert!(config.benchmark("HFV2").is_none());
    }

    #[test]
    fn test_config_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "[cluster]\nmodels = [\"org/a\"]\n").unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.aggregation.leaderboard_prefix, "leaderboard");
        assert_eq!(config.aggregation.sentinel_key, " ");
        assert_eq!(config.aggregation.composites.len(), 6);
        assert!(matches!(
            config.aggregation.composites[0].kind,
            CompositeKind::ChanceCorrectedSubtasks { .. }
        ));
        assert_eq!(config.cluster.memory, "64g");
        assert_eq!(config.cluster.cores, "8+1");
        assert_eq!(config.cluster.batch_size, 1);
        assert_eq!(config.cluster.fp_precision, 16);
        assert_eq!(config.cluster.poll_interval_secs, 60);
        assert_eq!(config.benchmark("HFV2").unwrap().tasks[0].subtasks.len(), 6);
    }

    #[test]
    fn test_config_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/config.toml"));
        assert!(result.unwrap_err().to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_umbrella_covers() {
        let umbrella = &default_umbrellas()[0];
        assert!(umbrella.covers("mmlu_world_religions"));
        assert!(!umbrella.covers("mmlu"));
        assert!(!umbrella.covers("mmlu_pro"));
        assert!(!umbrella.covers("mmlux_other"));
    }

    #[test]
    fn test_expected_metric_falls_back_to_umbrella() {
        let config = AggregationConfig::default();
        assert_eq!(config.expected_metric("hellaswag"), Some("acc_norm"));
        assert_eq!(config.expected_metric("mmlu_anatomy"), Some("acc"));
        assert_eq!(config.expected_metric("mmlu_stem"), None);
        assert_eq!(config.expected_metric("mmlu"), None);
    }
}
