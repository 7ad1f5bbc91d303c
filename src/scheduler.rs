//! Batch scheduler seam: submission and status queries against LSF.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;

static JOB_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Job <(\d+)>").expect("valid job id pattern"));

/// Job id from a submission tool's stdout, e.g. `Job <1234> is submitted to queue <x>.`
pub fn parse_job_id(stdout: &str) -> Option<String> {
    JOB_ID
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `jobid stat` table to id -> status, skipping the header line
pub fn parse_statuses(stdout: &str) -> HashMap<String, String> {
    stdout
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(id), Some(status)) => Some((id.to_string(), status.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Batch system the runner submits jobs to and polls
pub trait Scheduler {
    /// Run a submission command and return its stdout
    async fn submit(&self, command: &[String]) -> Result<String>;

    /// Status of every job the scheduler knows about
    async fn statuses(&self) -> Result<HashMap<String, String>>;
}

/// LSF via `jbsub` and `bjobs`
#[derive(Debug, Default, Clone)]
pub struct Lsf;

async fn run_command(program: &str, args: &[String]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to spawn {program}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        anyhow::bail!(
            "{} exited with {}\nstdout: {}\nstderr: {}",
            program,
            output.status,
            stdout.trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(stdout)
}

impl Scheduler for Lsf {
    async fn submit(&self, command: &[String]) -> Result<String> {
        let (program, args) = command.split_first().context("Empty submission command")?;
        run_command(program, args).await
    }

    async fn statuses(&self) -> Result<HashMap<String, String>> {
        let args = ["-a", "-o", "jobid stat"].map(str::to_string);
        let stdout = run_command("bjobs", &args).await.context("Error getting job statuses")?;
        Ok(parse_statuses(&stdout))
    }
}
