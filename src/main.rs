use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info, warn};

mod aggregation;
mod config;
mod duplicates;
mod error;
mod extraction;
mod models;
mod normalization;
mod object_store;
mod output;
mod pretty_names;
mod ranking;
mod reference;
mod runner;
mod scheduler;
mod telemetry;

use crate::aggregation::Aggregator;
use crate::config::Config;
use crate::object_store::{Credentials, DEFAULT_REGION, ObjectStore};
use crate::output::OutputFormat;
use crate::runner::Runner;
use crate::scheduler::Lsf;

const REFERENCE_FILE: &str = "results_from_papers.csv";
const RUNNER_LOG: &str = "runner.log";

/// Leaderboard evaluation CLI - submit benchmark jobs, pull and aggregate their results
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the model x scenario table from result artifacts and reference scores
    Aggregate {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory holding the result directories and the reference CSV
        #[arg(long)]
        output_dir: PathBuf,

        /// Result directories, relative to the output directory; defaults to the output directory itself
        #[arg(long, num_args = 1..)]
        res_dirs: Vec<PathBuf>,

        /// Reference scores CSV; defaults to <output-dir>/results_from_papers.csv
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Output format: plain, json or csv
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,

        /// Also write the table as CSV to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Submit harness jobs to the cluster and wait for them to finish
    Submit {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: PathBuf,

        /// Override the configured models
        #[arg(long, num_args = 1..)]
        models: Vec<String>,

        /// Override the configured benchmarks
        #[arg(long, num_args = 1..)]
        benchmarks: Vec<String>,

        /// Only run these subtasks
        #[arg(long, num_args = 1..)]
        only_subtasks: Vec<String>,

        /// Override the configured output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Download result artifacts under a prefix from an S3-compatible store
    Fetch {
        #[arg(long)]
        prefix: String,

        #[arg(long)]
        local_path: PathBuf,

        #[arg(long)]
        bucket: String,

        #[arg(long)]
        endpoint_url: String,

        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    match cli.command {
        Command::Aggregate {
            config,
            output_dir,
            res_dirs,
            reference,
            output,
            save,
        } => {
            telemetry::init_tracing(cli.json, level, None)?;
            let config = Config::load(config.as_deref())?;

            let result_dirs: Vec<PathBuf> = if res_dirs.is_empty() {
                vec![output_dir.clone()]
            } else {
                res_dirs.iter().map(|dir| output_dir.join(dir)).collect()
            };
            let reference = reference.unwrap_or_else(|| output_dir.join(REFERENCE_FILE));

            let table = Aggregator::new(&config.aggregation).run(&result_dirs, &reference)?;
            info!(
                models = table.rows.len(),
                scenarios = table.scenarios.len(),
                "Aggregation complete"
            );

            output::print_results(&table, output)?;
            if let Some(path) = save {
                output::save_csv(&table, &path)?;
            }
        }

        Command::Submit {
            config,
            models,
            benchmarks,
            only_subtasks,
            output_dir,
        } => {
            let mut config = Config::from_file(&config)?;
            if !models.is_empty() {
                config.cluster.models = models;
            }
            if !benchmarks.is_empty() {
                config.cluster.benchmarks = benchmarks;
            }
            if !only_subtasks.is_empty() {
                config.cluster.only_subtasks = only_subtasks;
            }
            if let Some(dir) = output_dir {
                config.cluster.output_dir = dir;
            }

            let log_file = config.cluster.output_dir.join(RUNNER_LOG);
            telemetry::init_tracing(cli.json, level, Some(&log_file))?;

            let runner = Runner::new(config, Lsf).with_progress(!cli.json);
            let summary = runner.run().await?;

            info!(
                submitted = summary.submitted,
                completed = summary.completed,
                failed = summary.failed.len(),
                untracked = summary.untracked,
                "Run finished"
            );
            if !summary.all_succeeded() {
                warn!("Some models failed to complete");
            }
        }

        Command::Fetch {
            prefix,
            local_path,
            bucket,
            endpoint_url,
            region,
        } => {
            telemetry::init_tracing(cli.json, level, None)?;
            let credentials = Credentials::from_env()?;
            let store = ObjectStore::new(&endpoint_url, &bucket, &region, credentials)?;
            store.download_prefix(&prefix, &local_path).await?;
        }
    }

    Ok(())
}
