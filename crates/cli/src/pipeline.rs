use rand::thread_rng;
use stackscore_cache::{Freshness, InstanceManager, MetaLedger};
use stackscore_config::{Layout, Settings};
use stackscore_core::Result;
use stackscore_registry::{read_direct_deps, ReferenceResolver};
use stackscore_task::{Interrupt, Scheduler, SchedulerConfig, WorkQueue};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Stand-in deadline for budgets beyond what `Instant` can represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// What to score and where to keep state
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub manifests: Vec<PathBuf>,
}

/// How a completed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Clean => 0,
            RunStatus::Failed => 1,
            RunStatus::Interrupted => 130,
        }
    }
}

/// Score the stale direct dependencies of `options.manifests`.
pub async fn run<R>(
    options: &RunOptions,
    settings: &Settings,
    resolver: &R,
    interrupt: Interrupt,
) -> Result<RunStatus>
where
    R: ReferenceResolver + ?Sized,
{
    let layout = Layout::under(&options.root);
    let config = SchedulerConfig::from_settings(settings, &layout)?;

    let deps = read_direct_deps(&options.manifests)?;
    layout.ensure()?;

    let mut ledger = MetaLedger::open(&layout.scores_dir);
    let stale: Vec<String> = deps
        .iter()
        .filter(|name| ledger.package_has_age(name, settings.stale_after))
        .cloned()
        .collect();
    tracing::info!(
        stale = stale.len(),
        total = deps.len(),
        "Selected dependencies to score"
    );

    let resolved = resolver.resolve(&stale).await;
    ledger.store_refs(&resolved)?;
    let refs = ledger.refs_for(&stale);
    tracing::info!(refs = refs.len(), "Resolved repository references");

    let queue = WorkQueue::shuffled(refs, &mut thread_rng());
    let deadline = deadline_after(Instant::now(), settings.target_load_time);

    let mut scheduler = Scheduler::new(
        config,
        InstanceManager::from_layout(&layout),
        ledger,
        interrupt,
    );
    let result = scheduler.run(queue, deadline).await?;

    Ok(if result.interrupted {
        RunStatus::Interrupted
    } else if result.had_failure() {
        RunStatus::Failed
    } else {
        RunStatus::Clean
    })
}

/// `now + budget`, clamped for budgets too large to add.
fn deadline_after(now: Instant, budget: Duration) -> Instant {
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_adds_budget() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(600)),
            now + Duration::from_secs(600)
        );
    }

    #[test]
    fn test_huge_budget_does_not_overflow() {
        let now = Instant::now();
        let budget = Duration::from_secs(200_000_000_000_000_000u64.saturating_mul(60));
        assert!(deadline_after(now, budget) > now);
        assert!(deadline_after(now, Duration::MAX) > now);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Clean.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Interrupted.exit_code(), 130);
    }
}
