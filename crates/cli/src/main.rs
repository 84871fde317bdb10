use clap::Parser;
use stackscore::{RunOptions, RunStatus};
use stackscore_config::Settings;
use stackscore_registry::JsDelivrResolver;
use stackscore_task::Interrupt;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stackscore")]
#[command(about = "Score the projects your package depends on", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding the working, scores and instances directories
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Log at debug level (same as VERBOSE=1)
    #[arg(short, long)]
    verbose: bool,

    /// package.json files whose direct dependencies should be scored
    #[arg(required = true, value_name = "PACKAGE_JSON")]
    manifests: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let settings = Settings::from_env()?;
    if let Err(e) = stackscore_utils::tracing::init(cli.verbose || settings.verbose) {
        eprintln!("Failed to initialise logging: {e}");
    }
    tracing::debug!(?settings, "Loaded settings");

    let interrupt = Interrupt::new();
    stackscore::signals::install(interrupt.clone());

    let options = RunOptions {
        root: cli.root,
        manifests: cli.manifests,
    };
    let status = stackscore::run(&options, &settings, &JsDelivrResolver::new(), interrupt).await?;

    if status == RunStatus::Failed {
        tracing::warn!("Some dependencies could not be scored");
    }
    Ok(ExitCode::from(status.exit_code()))
}
