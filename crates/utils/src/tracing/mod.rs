use std::io::IsTerminal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use ::tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects `debug`, and the
/// default level is `info`. Output goes to stderr so the child's stdout
/// passthrough stays clean.
pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(verbose)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::stderr().is_terminal()
}

/// Create a span for one scheduled job
pub fn job_span(reference: &str) -> Span {
    span!(Level::INFO, "job", reference = %reference)
}

/// Emit a structured event for a finished job phase
pub fn phase_completed(reference: &str, phase: &str, duration_ms: u64, success: bool) {
    if success {
        info!(
            reference = %reference,
            phase = %phase,
            duration_ms = %duration_ms,
            "phase_completed"
        );
    } else {
        warn!(
            reference = %reference,
            phase = %phase,
            duration_ms = %duration_ms,
            "phase_failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_selects_debug() {
        assert_eq!(default_directive(true), "debug");
        assert_eq!(default_directive(false), "info");
    }
}
