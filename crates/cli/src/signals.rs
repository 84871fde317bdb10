//! Ctrl-C handling

use stackscore_task::{Interrupt, InterruptDisposition};

/// Exit status used when the run is interrupted
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Route Ctrl-C into `interrupt`.
///
/// With a child running, the interrupt is forwarded and the scheduler winds
/// down on its own. With nothing running there is nothing to wait for, so
/// the process exits immediately.
pub fn install(interrupt: Interrupt) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            match interrupt.trigger() {
                InterruptDisposition::Forwarded => {
                    tracing::info!("Interrupt received, stopping after the current job");
                }
                InterruptDisposition::Idle => {
                    tracing::info!("Interrupt received with no child running, exiting");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        }
    });
}
