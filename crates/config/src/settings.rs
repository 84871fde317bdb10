//! Environment-driven settings

use stackscore_core::constants::*;
use stackscore_core::{Error, Result};
use std::fmt;
use std::time::Duration;

/// The external scoring tool, as a program plus leading arguments.
///
/// `SOURCECRED_CLI="node /opt/sourcecred/bin/cli.js"` becomes program `node`
/// with `["/opt/sourcecred/bin/cli.js"]`; the subcommand and reference are
/// appended per phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line with shell word rules.
    pub fn parse(line: &str) -> Result<Self> {
        let words = shlex::split(line).ok_or_else(|| {
            Error::configuration(format!("{TOOL_COMMAND_VAR} has unbalanced quoting: {line}"))
        })?;
        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| Error::configuration(format!("{TOOL_COMMAND_VAR} is empty")))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Full argument list for one invocation: leading args, subcommand, reference.
    pub fn args_for(&self, subcommand: &str, reference: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(subcommand.to_string());
        args.push(reference.to_string());
        args
    }
}

/// Settings for one run
#[derive(Clone)]
pub struct Settings {
    /// Global wall-clock budget; no job starts after it is spent
    pub target_load_time: Duration,
    pub verbose: bool,
    /// Credential handed to the load phase
    pub github_token: Option<String>,
    pub tool: Option<ToolCommand>,
    /// Hard per-job timeout for the load phase
    pub load_timeout: Duration,
    /// Hard timeout for the score phase
    pub score_timeout: Duration,
    /// Packages scored longer ago than this are reloaded
    pub stale_after: Duration,
    /// Delay between the termination signal and a forced kill
    pub kill_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_load_time: Duration::from_secs(DEFAULT_TARGET_LOAD_TIME_MINS * 60),
            verbose: false,
            github_token: None,
            tool: None,
            load_timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
            score_timeout: Duration::from_secs(DEFAULT_SCORE_TIMEOUT_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_HOURS * 3600),
            kill_grace: Duration::from_millis(DEFAULT_KILL_GRACE_MILLIS),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("target_load_time", &self.target_load_time)
            .field("verbose", &self.verbose)
            .field("github_token", &self.github_token.as_ref().map(|_| "***"))
            .field("tool", &self.tool)
            .field("load_timeout", &self.load_timeout)
            .field("score_timeout", &self.score_timeout)
            .field("stale_after", &self.stale_after)
            .field("kill_grace", &self.kill_grace)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let budget_secs = parse_scaled(TARGET_LOAD_TIME_MINS_VAR, non_empty(TARGET_LOAD_TIME_MINS_VAR), 60)?;
        let load_secs = parse_u64(LOAD_TIMEOUT_SECS_VAR, non_empty(LOAD_TIMEOUT_SECS_VAR))?;
        let score_secs = parse_u64(SCORE_TIMEOUT_SECS_VAR, non_empty(SCORE_TIMEOUT_SECS_VAR))?;
        let stale_secs = parse_scaled(STALE_AFTER_HOURS_VAR, non_empty(STALE_AFTER_HOURS_VAR), 3600)?;
        let grace_millis = parse_u64(KILL_GRACE_MILLIS_VAR, non_empty(KILL_GRACE_MILLIS_VAR))?;

        let tool = non_empty(TOOL_COMMAND_VAR)
            .map(|line| ToolCommand::parse(&line))
            .transpose()?;

        Ok(Self {
            target_load_time: budget_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.target_load_time),
            verbose: non_empty(VERBOSE_VAR).is_some_and(|v| is_truthy(&v)),
            github_token: non_empty(GITHUB_TOKEN_VAR),
            tool,
            load_timeout: load_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.load_timeout),
            score_timeout: score_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.score_timeout),
            stale_after: stale_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
            kill_grace: grace_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.kill_grace),
        })
    }

    /// The configured tool, or a configuration error naming the variable
    pub fn tool(&self) -> Result<&ToolCommand> {
        self.tool
            .as_ref()
            .ok_or_else(|| Error::configuration(format!("{TOOL_COMMAND_VAR} must be set")))
    }
}

fn parse_u64(key: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.trim().parse::<u64>().map_err(|e| {
                Error::configuration(format!("{key} must be a non-negative integer, got '{v}': {e}"))
            })
        })
        .transpose()
}

/// Parse a count of `factor`-second units into seconds.
fn parse_scaled(key: &str, value: Option<String>, factor: u64) -> Result<Option<u64>> {
    parse_u64(key, value)?
        .map(|units| {
            units
                .checked_mul(factor)
                .ok_or_else(|| Error::configuration(format!("{key} is too large: {units}")))
        })
        .transpose()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "1" | "true" | "on"
    )
}
