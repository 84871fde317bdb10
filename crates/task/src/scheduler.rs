//! Deadline-bounded job loop
//!
//! One job at a time: take the next reference, stop if the global deadline
//! has passed, lease a working directory, run the load phase and then the
//! score phase, release the directory and record the score. A failing job
//! never stops the loop; an interrupt does.

use crate::interrupt::Interrupt;
use crate::queue::WorkQueue;
use crate::score_writer::ScoreWriter;
use crate::supervisor::{ExitOutcome, JobCommand, Stdout, Supervisor};
use stackscore_cache::{Freshness, InstanceManager, JobDisposition, JobInstance};
use stackscore_config::{Layout, Settings, ToolCommand};
use stackscore_core::constants::{
    GITHUB_TOKEN_VAR, LOAD_SUBCOMMAND, SCORE_SUBCOMMAND, WORKING_DIR_VAR,
};
use stackscore_core::{RefId, Result, RunResult};
use stackscore_utils::tracing::{job_span, phase_completed};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Everything the scheduler needs to build and time jobs
#[derive(Clone)]
pub struct SchedulerConfig {
    pub tool: ToolCommand,
    pub github_token: Option<String>,
    pub load_timeout: Duration,
    pub score_timeout: Duration,
    pub kill_grace: Duration,
    pub scores_dir: PathBuf,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings, layout: &Layout) -> Result<Self> {
        Ok(Self {
            tool: settings.tool()?.clone(),
            github_token: settings.github_token.clone(),
            load_timeout: settings.load_timeout,
            score_timeout: settings.score_timeout,
            kill_grace: settings.kill_grace,
            scores_dir: layout.scores_dir.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed,
    Interrupted,
}

pub struct Scheduler<L: Freshness> {
    config: SchedulerConfig,
    instances: InstanceManager,
    ledger: L,
    supervisor: Supervisor,
    interrupt: Interrupt,
}

impl<L: Freshness> Scheduler<L> {
    pub fn new(
        config: SchedulerConfig,
        instances: InstanceManager,
        ledger: L,
        interrupt: Interrupt,
    ) -> Self {
        let supervisor = Supervisor::new(interrupt.clone(), config.kill_grace);
        Self {
            config,
            instances,
            ledger,
            supervisor,
            interrupt,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn into_ledger(self) -> L {
        self.ledger
    }

    /// Drain `queue` until it is empty, the deadline passes or an interrupt
    /// arrives.
    ///
    /// The deadline is only checked before a job starts; a running job is
    /// bounded by its own phase timeouts. Errors are reserved for
    /// infrastructure failures: a tool that cannot be spawned, a result file
    /// that cannot be written or a ledger that cannot be saved.
    pub async fn run(&mut self, mut queue: WorkQueue, deadline: Instant) -> Result<RunResult> {
        let mut result = RunResult::default();

        loop {
            if self.interrupt.is_requested() {
                queue.clear();
                result.interrupted = true;
                break;
            }

            let Some(reference) = queue.pop() else {
                break;
            };

            if Instant::now() >= deadline {
                tracing::warn!(remaining = queue.len() + 1, "Out of time, returning");
                result.out_of_time = true;
                break;
            }

            let outcome = self
                .run_job(&reference)
                .instrument(job_span(&reference))
                .await?;

            match outcome {
                JobOutcome::Succeeded => {
                    result.succeeded.insert(reference);
                }
                JobOutcome::Failed => {
                    result.failed.insert(reference);
                }
                JobOutcome::Interrupted => {
                    result.failed.insert(reference);
                    result.interrupted = true;
                    queue.clear();
                    break;
                }
            }
        }

        if result.had_failure() {
            tracing::warn!(failed = result.failed.len(), "One of the deps failed to load");
        }
        tracing::info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            interrupted = result.interrupted,
            out_of_time = result.out_of_time,
            "Run finished"
        );
        Ok(result)
    }

    async fn run_job(&mut self, reference: &RefId) -> Result<JobOutcome> {
        let instance = match self.instances.open(reference) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::error!(error = %e, "Could not open instance");
                return Ok(JobOutcome::Failed);
            }
        };

        tracing::info!(dir = %instance.working_dir.display(), "Loading");
        let load_command = self.load_command(reference, &instance.working_dir);
        let started = Instant::now();
        let load = self
            .supervisor
            .run(&load_command, self.config.load_timeout, Stdout::Inherit)
            .await;
        let load = match load {
            Ok(outcome) => outcome,
            Err(e) => {
                self.close(instance, JobDisposition::Failed);
                return Err(e);
            }
        };
        phase_completed(reference, LOAD_SUBCOMMAND, elapsed_ms(started), load.is_success());

        if !load.is_success() {
            tracing::warn!(outcome = ?load, "Load phase failed");
            self.close(instance, JobDisposition::Failed);
            return Ok(failure_kind(load));
        }
        if self.interrupt.is_requested() {
            self.close(instance, JobDisposition::Failed);
            return Ok(JobOutcome::Interrupted);
        }

        let mut writer = match ScoreWriter::create(&self.config.scores_dir, reference) {
            Ok(writer) => writer,
            Err(e) => {
                self.close(instance, JobDisposition::Failed);
                return Err(e);
            }
        };

        let score_command = self.score_command(reference, &instance.working_dir);
        let started = Instant::now();
        let score = self
            .supervisor
            .run(
                &score_command,
                self.config.score_timeout,
                Stdout::Capture(&mut writer),
            )
            .await;
        let score = match score {
            Ok(outcome) => outcome,
            Err(e) => {
                writer.discard();
                self.close(instance, JobDisposition::Failed);
                return Err(e);
            }
        };
        phase_completed(reference, SCORE_SUBCOMMAND, elapsed_ms(started), score.is_success());

        if !score.is_success() {
            tracing::warn!(outcome = ?score, "Score phase failed");
            writer.discard();
            self.close(instance, JobDisposition::Failed);
            return Ok(failure_kind(score));
        }

        let bytes = writer.bytes_written();
        let path = match writer.finish() {
            Ok(path) => path,
            Err(e) => {
                self.close(instance, JobDisposition::Failed);
                return Err(e);
            }
        };
        tracing::debug!(path = %path.display(), bytes, "Wrote score result");

        self.close(instance, JobDisposition::Succeeded);
        self.ledger.bump_score(reference)?;
        Ok(JobOutcome::Succeeded)
    }

    /// Release an instance. Cache I/O failures are logged, never fatal.
    fn close(&self, instance: JobInstance, disposition: JobDisposition) {
        match self.instances.close(instance, disposition) {
            Ok(outcome) => tracing::debug!(?outcome, "Closed instance"),
            Err(e) => tracing::error!(error = %e, "Could not close instance"),
        }
    }

    fn load_command(&self, reference: &RefId, working_dir: &Path) -> JobCommand {
        let command = self.phase_command(LOAD_SUBCOMMAND, reference, working_dir);
        match &self.config.github_token {
            Some(token) => command.env(GITHUB_TOKEN_VAR, token.as_str()),
            None => command,
        }
    }

    fn score_command(&self, reference: &RefId, working_dir: &Path) -> JobCommand {
        self.phase_command(SCORE_SUBCOMMAND, reference, working_dir)
            .env_remove(GITHUB_TOKEN_VAR)
    }

    fn phase_command(&self, subcommand: &str, reference: &RefId, working_dir: &Path) -> JobCommand {
        let tool = &self.config.tool;
        JobCommand::new(&tool.program, tool.args_for(subcommand, reference))
            .env(WORKING_DIR_VAR, working_dir.to_string_lossy())
    }
}

fn failure_kind(outcome: ExitOutcome) -> JobOutcome {
    match outcome {
        ExitOutcome::Interrupted => JobOutcome::Interrupted,
        _ => JobOutcome::Failed,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            tool: ToolCommand::new("node", vec!["cli.js".to_string()]),
            github_token: Some("secret".to_string()),
            load_timeout: Duration::from_secs(1),
            score_timeout: Duration::from_secs(1),
            kill_grace: Duration::from_millis(10),
            scores_dir: PathBuf::from("/scores"),
        }
    }

    fn scheduler() -> Scheduler<stackscore_cache::MetaLedger> {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let ledger = stackscore_cache::MetaLedger::open(temp_dir.path());
        Scheduler::new(
            config(),
            InstanceManager::new("/shared", "/instances"),
            ledger,
            Interrupt::new(),
        )
    }

    #[test]
    fn test_load_command_carries_token() {
        let command = scheduler().load_command(&RefId::new("a/b"), Path::new("/shared"));
        assert_eq!(command.program, "node");
        assert_eq!(command.args, vec!["cli.js", "load", "a/b"]);
        assert!(command
            .env
            .contains(&(WORKING_DIR_VAR.to_string(), "/shared".to_string())));
        assert!(command
            .env
            .contains(&(GITHUB_TOKEN_VAR.to_string(), "secret".to_string())));
    }

    #[test]
    fn test_score_command_drops_token() {
        let command = scheduler().score_command(&RefId::new("a/b"), Path::new("/instances/612f62"));
        assert_eq!(command.args, vec!["cli.js", "scores", "a/b"]);
        assert!(command.env.iter().all(|(key, _)| key != GITHUB_TOKEN_VAR));
        assert_eq!(command.env_remove, vec![GITHUB_TOKEN_VAR.to_string()]);
    }

    #[test]
    fn test_interrupted_phase_stops_the_run() {
        assert_eq!(failure_kind(ExitOutcome::Interrupted), JobOutcome::Interrupted);
        assert_eq!(failure_kind(ExitOutcome::TimedOut), JobOutcome::Failed);
        assert_eq!(failure_kind(ExitOutcome::Exited(1)), JobOutcome::Failed);
    }
}
