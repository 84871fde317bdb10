/// Constants used throughout the stackscore codebase
// Environment variable names read by the scheduler
pub const TARGET_LOAD_TIME_MINS_VAR: &str = "TARGET_LOAD_TIME_MINS";
pub const VERBOSE_VAR: &str = "VERBOSE";
pub const GITHUB_TOKEN_VAR: &str = "SOURCECRED_GITHUB_TOKEN";
pub const TOOL_COMMAND_VAR: &str = "SOURCECRED_CLI";
pub const LOAD_TIMEOUT_SECS_VAR: &str = "LOAD_TIMEOUT_SECS";
pub const SCORE_TIMEOUT_SECS_VAR: &str = "SCORE_TIMEOUT_SECS";
pub const STALE_AFTER_HOURS_VAR: &str = "STALE_AFTER_HOURS";
pub const KILL_GRACE_MILLIS_VAR: &str = "KILL_GRACE_MILLIS";

// Environment variable handed to the external tool
pub const WORKING_DIR_VAR: &str = "SOURCECRED_DIRECTORY";

// Tool subcommands
pub const LOAD_SUBCOMMAND: &str = "load";
pub const SCORE_SUBCOMMAND: &str = "scores";

// Defaults
pub const DEFAULT_TARGET_LOAD_TIME_MINS: u64 = 10;
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_SCORE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STALE_AFTER_HOURS: u64 = 48;
pub const DEFAULT_KILL_GRACE_MILLIS: u64 = 2000;

// Directory layout, relative to the run root
pub const SHARED_DIR_NAME: &str = ".sourcecred";
pub const SCORES_DIR_NAME: &str = ".scores";
pub const INSTANCES_DIR_NAME: &str = ".instances";
pub const ARTIFACT_SUBDIR: &str = "cache";

// Ledger files
pub const LEDGER_FILE: &str = "meta.json";
pub const LEDGER_GZ_FILE: &str = "meta.json.gz";
pub const LEDGER_VERSION: u32 = 1;

// Result files
pub const SCORE_FILE_SUFFIX: &str = ".json.gz";
