use crate::aggregation::{discover_artifacts, load_artifact};
use crate::config::{BenchmarkTask, Config};
use crate::error::EvalError;
use crate::scheduler::{Scheduler, parse_job_id};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Replace path and tag separators so a model id can name a directory
pub fn sanitize_model_id(model: &str) -> String {
    model.replace(['/', ':'], "_")
}

/// Harness `--model_args` for a model at the given floating-point precision
pub fn model_args(model: &str, fp_precision: u8) -> Result<String, EvalError> {
    let precision = match fp_precision {
        16 => "dtype=float16".to_string(),
        8 | 4 => format!("load_in_{fp_precision}_bit=True"),
        other => return Err(EvalError::UnsupportedPrecision(other)),
    };
    Ok(format!("pretrained={model},{precision}"))
}

/// Task names already present in result artifacts under `output_path`
pub fn done_subtasks(output_path: &Path) -> Result<HashSet<String>> {
    let mut done = HashSet::new();
    if !output_path.exists() {
        return Ok(done);
    }

    for path in discover_artifacts(&[output_path.to_path_buf()])? {
        done.extend(load_artifact(&path)?.results.into_keys());
    }
    Ok(done)
}

/// One submitted harness job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub model: String,
    pub task: String,
    /// None when the scheduler output could not be parsed or submission failed
    pub job_id: Option<String>,
}

/// Outcome of a submit-and-monitor run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobSummary {
    pub submitted: usize,
    /// Submissions without a job id, excluded from monitoring
    pub untracked: usize,
    pub completed: usize,
    /// (job id, model) of jobs that exited with an error
    pub failed: Vec<(String, String)>,
    /// False when monitoring stopped before every job was terminal
    pub finished: bool,
}

impl JobSummary {
    pub fn all_succeeded(&self) -> bool {
        self.finished && self.failed.is_empty() && self.untracked == 0
    }
}

/// Submits one harness job per (model, benchmark task) and tracks them to completion
pub struct Runner<S> {
    config: Config,
    scheduler: S,
    poll_interval: Duration,
    show_progress: bool,
}

impl<S: Scheduler> Runner<S> {
    /// Runner polling at the configured interval, progress bar hidden
    pub fn new(config: Config, scheduler: S) -> Self {
        let poll_interval = Duration::from_secs(config.cluster.poll_interval_secs);
        Self {
            config,
            scheduler,
            poll_interval,
            show_progress: false,
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Submit every job and monitor until all are terminal; Ctrl-C aborts
    pub async fn run(&self) -> Result<JobSummary> {
        tokio::select! {
            summary = self.submit_and_monitor() => summary,
            _ = tokio::signal::ctrl_c() => {
                warn!("Experiment interrupted. Exiting.");
                Err(EvalError::Interrupted.into())
            }
        }
    }

    async fn submit_and_monitor(&self) -> Result<JobSummary> {
        let submissions = self.submit_all().await?;
        let tracked: Vec<(String, String)> = submissions
            .iter()
            .filter_map(|s| s.job_id.clone().map(|id| (id, s.model.clone())))
            .collect();

        let mut summary = self.monitor(tracked).await;
        summary.submitted = submissions.len();
        summary.untracked = submissions.iter().filter(|s| s.job_id.is_none()).count();
        Ok(summary)
    }

    /// Submit the configured benchmarks for every model
    pub async fn submit_all(&self) -> Result<Vec<Submission>> {
        let cluster = &self.config.cluster;
        let mut submissions = Vec::new();

        for model in &cluster.models {
            let mut runs_per_model = 0;
            for name in &cluster.benchmarks {
                let benchmark = self
                    .config
                    .benchmark(name)
                    .with_context(|| format!("Unknown benchmark: {name}"))?;

                for task in &benchmark.tasks {
                    if runs_per_model > 0 && cluster.single_task_per_model {
                        continue;
                    }
                    if let Some(submission) = self.submit_task(model, task).await? {
                        if submission.job_id.is_some() {
                            runs_per_model += 1;
                        }
                        submissions.push(submission);
                    }
                }
            }
        }

        Ok(submissions)
    }

    fn output_path(&self, model: &str) -> PathBuf {
        self.config.cluster.output_dir.join(sanitize_model_id(model))
    }

    /// Subtasks of `task` still to run for `model`
    fn remaining_subtasks(&self, model: &str, task: &BenchmarkTask) -> Result<Vec<String>> {
        let only = &self.config.cluster.only_subtasks;
        let done = done_subtasks(&self.output_path(model))?;

        let remaining: Vec<String> = task
            .subtasks
            .iter()
            .filter(|s| only.is_empty() || only.contains(s))
            .filter(|s| !done.contains(*s))
            .cloned()
            .collect();

        if remaining.is_empty() {
            info!(
                model,
                task = %task.task,
                "Either all {} subtasks already exist or the assigned subtasks are not in the benchmark",
                task.subtasks.len()
            );
        } else if remaining.len() < task.subtasks.len() {
            info!(
                model,
                skipped = task.subtasks.len() - remaining.len(),
                left = remaining.len(),
                "Skipping subtasks already evaluated"
            );
        }
        Ok(remaining)
    }

    fn cache_root(&self) -> Result<PathBuf> {
        match &self.config.cluster.cache_root {
            Some(root) => Ok(root.clone()),
            None => std::env::var("XDG_CACHE_HOME")
                .map(PathBuf::from)
                .context("cluster.cache_root is not configured and XDG_CACHE_HOME is not set"),
        }
    }

    /// Scheduler command line for one harness invocation
    pub fn build_command(&self, model: &str, task: &BenchmarkTask, subtasks: &[String]) -> Result<Vec<String>> {
        let cluster = &self.config.cluster;
        let sanitized = sanitize_model_id(model);
        let cache_dir = self.cache_root()?.join(format!("hf_cache_{sanitized}"));

        let mut command: Vec<String> = vec![
            "jbsub".into(),
            "-name".into(),
            format!("{}_{}", task.task, model),
            "-mem".into(),
            cluster.memory.clone(),
            "-cores".into(),
            cluster.cores.clone(),
            "-require".into(),
            cluster.gpu.clone(),
            "-q".into(),
            cluster.queue.clone(),
            format!("cd {}", cluster.harness_dir.display()),
            "&&".into(),
            format!("HF_HOME={}", cache_dir.display()),
            cluster.python_executable.clone(),
            cluster.lmeval_path.join("lm_eval").display().to_string(),
            "--model_args".into(),
            model_args(model, cluster.fp_precision)?,
            "--batch_size".into(),
            cluster.batch_size.to_string(),
            "--tasks".into(),
            subtasks.join(","),
            "--output_path".into(),
            self.output_path(model).display().to_string(),
            "--cache_requests".into(),
            "true".into(),
            "--log_samples".into(),
            "--trust_remote_code".into(),
        ];

        if let Some(limit) = cluster.limit {
            command.push(format!("--limit={limit}"));
        }
        if let Some(num_fewshot) = task.num_fewshot {
            command.push(format!("--num_fewshot={num_fewshot}"));
        }

        Ok(command)
    }

    async fn submit_task(&self, model: &str, task: &BenchmarkTask) -> Result<Option<Submission>> {
        let subtasks = self.remaining_subtasks(model, task)?;
        if subtasks.is_empty() {
            return Ok(None);
        }

        let command = self.build_command(model, task, &subtasks)?;
        let job_id = match self.scheduler.submit(&command).await {
            Ok(stdout) => {
                info!(
                    model,
                    output = %self.output_path(model).display(),
                    "Submitted job"
                );
                let job_id = parse_job_id(&stdout);
                match &job_id {
                    Some(id) => info!(job_id = %id, "Job ID"),
                    None => warn!(stdout = %stdout.trim(), "Could not parse job ID from output"),
                }
                job_id
            }
            Err(e) => {
                error!(model, error = %format!("{e:#}"), "Error submitting job");
                None
            }
        };

        Ok(Some(Submission {
            model: model.to_string(),
            task: task.task.clone(),
            job_id,
        }))
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style.progress_chars("#>-"));
        pb.set_message("Processing Jobs");
        pb
    }

    /// Poll job statuses until every tracked (job id, model) is terminal.
    ///
    /// A failed status query stops monitoring and leaves `finished` false.
    pub async fn monitor(&self, jobs: Vec<(String, String)>) -> JobSummary {
        let pb = self.progress_bar(jobs.len());
        let mut pending = jobs;
        let mut summary = JobSummary {
            finished: true,
            ..JobSummary::default()
        };

        while !pending.is_empty() {
            sleep(self.poll_interval).await;

            let statuses = match self.scheduler.statuses().await {
                Ok(statuses) => statuses,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Stopping job monitoring");
                    summary.finished = false;
                    break;
                }
            };

            pending.retain(|(job_id, model)| match statuses.get(job_id).map(String::as_str) {
                Some("DONE") => {
                    info!(job_id = %job_id, "Job completed successfully");
                    summary.completed += 1;
                    pb.inc(1);
                    false
                }
                Some("EXIT") => {
                    error!(job_id = %job_id, model = %model, "Job failed. Check LSF logs.");
                    summary.failed.push((job_id.clone(), model.clone()));
                    pb.inc(1);
                    false
                }
                // RUN, PEND and friends
                _ => true,
            });
        }
        pb.finish_and_clear();

        if !summary.failed.is_empty() {
            let ids: Vec<&str> = summary.failed.iter().map(|(id, _)| id.as_str()).collect();
            error!("{} jobs failed: {}", ids.len(), ids.join(", "));
        }

        summary
    }
}
