//! End-to-end runs of the scheduler against a shell stand-in for the tool

#![cfg(unix)]

use flate2::read::GzDecoder;
use stackscore_cache::{InstanceManager, MetaLedger};
use stackscore_config::{Layout, ToolCommand};
use stackscore_core::RefId;
use stackscore_task::{Interrupt, InterruptDisposition, Scheduler, SchedulerConfig, ScoreWriter, WorkQueue};
use stackscore_utils::{compress_tree, decompress_tree, set_modified};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

const TOOL_SCRIPT: &str = r#"
phase="$1"
ref="$2"
printf '%s %s token=%s dir=%s\n' "$phase" "$ref" "${SOURCECRED_GITHUB_TOKEN:-none}" "$SOURCECRED_DIRECTORY" >> "$STACKSCORE_TEST_LOG"
case "$ref" in
  fail-load/*)
    if [ "$phase" = load ]; then exit 1; fi ;;
  fail-score/*)
    if [ "$phase" = scores ]; then printf '{"partial":'; exit 2; fi ;;
  hang-load/*)
    if [ "$phase" = load ]; then exec sleep 30; fi ;;
  slow-load/*)
    if [ "$phase" = load ]; then sleep 1; fi ;;
  slow-score/*)
    if [ "$phase" = scores ]; then printf '{"slow":'; exec sleep 30; fi ;;
  touch-one/*)
    if [ "$phase" = load ]; then printf fresh > "$SOURCECRED_DIRECTORY/cache/github.db"; fi ;;
  snapshot/*)
    if [ "$phase" = load ]; then
      printf 'seen=%s\n' "$(cat "$SOURCECRED_DIRECTORY/cache/github.db")" >> "$STACKSCORE_TEST_LOG"
      printf updated > "$SOURCECRED_DIRECTORY/cache/github.db"
    fi ;;
  touch-two/*)
    if [ "$phase" = load ]; then
      printf fresh > "$SOURCECRED_DIRECTORY/cache/github.db"
      printf fresh > "$SOURCECRED_DIRECTORY/cache/discourse.db"
    fi ;;
esac
if [ "$phase" = scores ]; then printf '{"ref":"%s"}' "$ref"; fi
exit 0
"#;

struct Fixture {
    _temp: TempDir,
    layout: Layout,
    log: PathBuf,
    script: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let layout = Layout::under(temp.path());
        layout.ensure().unwrap();

        // A baseline artifact with an old timestamp, so diffs have something to compare
        let artifacts = layout.shared_artifacts();
        fs::create_dir_all(&artifacts).unwrap();
        for name in ["github.db", "discourse.db"] {
            let path = artifacts.join(name);
            fs::write(&path, b"stale").unwrap();
            set_modified(&path, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000)).unwrap();
        }

        let log = temp.path().join("calls.log");
        fs::write(&log, b"").unwrap();
        let script = temp.path().join("tool.sh");
        let header = format!("STACKSCORE_TEST_LOG='{}'", log.display());
        fs::write(&script, format!("{header}{TOOL_SCRIPT}")).unwrap();

        Self {
            _temp: temp,
            layout,
            log,
            script,
        }
    }

    fn config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tool: ToolCommand::new("sh", vec![self.script.to_string_lossy().into_owned()]),
            github_token: Some("t0ken".to_string()),
            load_timeout: Duration::from_secs(10),
            score_timeout: Duration::from_secs(5),
            kill_grace: Duration::from_millis(200),
            scores_dir: self.layout.scores_dir.clone(),
        }
    }

    fn scheduler(&self, interrupt: &Interrupt) -> Scheduler<MetaLedger> {
        self.scheduler_with(self.config(), interrupt)
    }

    fn scheduler_with(&self, config: SchedulerConfig, interrupt: &Interrupt) -> Scheduler<MetaLedger> {
        Scheduler::new(
            config,
            InstanceManager::from_layout(&self.layout),
            MetaLedger::open(&self.layout.scores_dir),
            interrupt.clone(),
        )
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn result_path(&self, reference: &str) -> PathBuf {
        ScoreWriter::result_path(&self.layout.scores_dir, &RefId::new(reference))
    }

    fn result(&self, reference: &str) -> Option<String> {
        let path = self.result_path(reference);
        if !path.exists() {
            return None;
        }
        let mut out = String::new();
        GzDecoder::new(fs::File::open(path).unwrap())
            .read_to_string(&mut out)
            .unwrap();
        Some(out)
    }
}

fn queue(order: &[&str]) -> WorkQueue {
    // Pops from the back, so reverse to run in the listed order
    WorkQueue::new(order.iter().rev().map(|r| RefId::new(*r)).collect())
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(120)
}

fn count(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_successful_and_failed_jobs() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    let result = scheduler
        .run(queue(&["ok/a", "fail-load/b", "ok/c"]), far_deadline())
        .await
        .unwrap();

    assert!(result.succeeded.contains(&RefId::new("ok/a")));
    assert!(result.succeeded.contains(&RefId::new("ok/c")));
    assert!(result.failed.contains(&RefId::new("fail-load/b")));
    assert!(!result.interrupted);
    assert!(!result.out_of_time);

    assert_eq!(fixture.result("ok/a").as_deref(), Some("{\"ref\":\"ok/a\"}"));
    assert_eq!(fixture.result("fail-load/b"), None);

    let ledger = scheduler.ledger();
    assert!(ledger.last_scored(&RefId::new("ok/a")).is_some());
    assert!(ledger.last_scored(&RefId::new("fail-load/b")).is_none());

    // The failed load never reached the score phase
    let calls = fixture.calls();
    assert!(calls.iter().any(|c| c.starts_with("load fail-load/b")));
    assert!(!calls.iter().any(|c| c.starts_with("scores fail-load/b")));
}

#[tokio::test]
async fn test_failed_score_leaves_no_result() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    let result = scheduler
        .run(queue(&["fail-score/a"]), far_deadline())
        .await
        .unwrap();

    assert!(result.failed.contains(&RefId::new("fail-score/a")));
    assert_eq!(fixture.result("fail-score/a"), None);
    // Only the ledger files may exist, never a temporary result
    assert!(fs::read_dir(&fixture.layout.scores_dir)
        .unwrap()
        .all(|e| !e.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
    assert!(scheduler
        .ledger()
        .last_scored(&RefId::new("fail-score/a"))
        .is_none());
}

#[tokio::test]
async fn test_credential_reaches_load_only() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    scheduler.run(queue(&["ok/a"]), far_deadline()).await.unwrap();

    let calls = fixture.calls();
    let shared = fixture.layout.shared_dir.display().to_string();
    assert_eq!(
        calls,
        vec![
            format!("load ok/a token=t0ken dir={shared}"),
            format!("scores ok/a token=none dir={shared}"),
        ]
    );
}

#[tokio::test]
async fn test_hanging_load_times_out() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut config = fixture.config();
    config.load_timeout = Duration::from_millis(500);
    let mut scheduler = fixture.scheduler_with(config, &interrupt);

    let started = Instant::now();
    let result = scheduler
        .run(queue(&["hang-load/a", "ok/b"]), far_deadline())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(result.failed.contains(&RefId::new("hang-load/a")));
    assert!(result.succeeded.contains(&RefId::new("ok/b")));
}

#[tokio::test]
async fn test_expired_deadline_starts_nothing() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    let result = scheduler
        .run(queue(&["ok/a", "ok/b"]), Instant::now())
        .await
        .unwrap();

    assert!(result.out_of_time);
    assert_eq!(result.attempted(), 0);
    assert!(fixture.calls().is_empty());
}

#[tokio::test]
async fn test_deadline_is_checked_between_jobs() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    // The running job finishes even though the deadline passes meanwhile
    let deadline = Instant::now() + Duration::from_millis(300);
    let result = scheduler
        .run(queue(&["slow-load/a", "ok/b"]), deadline)
        .await
        .unwrap();

    assert!(result.succeeded.contains(&RefId::new("slow-load/a")));
    assert!(!result.succeeded.contains(&RefId::new("ok/b")));
    assert!(result.out_of_time);
    assert!(!fixture.calls().iter().any(|c| c.contains("ok/b")));

    let empty = scheduler.run(WorkQueue::default(), Instant::now()).await.unwrap();
    assert_eq!(empty.attempted(), 0);
    assert!(!empty.out_of_time);
}

#[tokio::test]
async fn test_interrupt_stops_the_run() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    let raiser = interrupt.clone();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        raiser.trigger()
    });

    let started = Instant::now();
    let result = scheduler
        .run(queue(&["slow-score/a", "ok/b"]), far_deadline())
        .await
        .unwrap();

    assert_eq!(trigger.await.unwrap(), InterruptDisposition::Forwarded);
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(result.interrupted);
    assert!(result.failed.contains(&RefId::new("slow-score/a")));
    assert!(result.succeeded.is_empty());
    assert_eq!(fixture.result("slow-score/a"), None);
    assert!(!fixture.calls().iter().any(|c| c.contains("ok/b")));
}

#[tokio::test]
async fn test_single_touched_artifact_is_promoted() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    let result = scheduler
        .run(queue(&["touch-one/a"]), far_deadline())
        .await
        .unwrap();
    assert!(result.succeeded.contains(&RefId::new("touch-one/a")));

    let snapshot = fixture
        .layout
        .instances_dir
        .join(RefId::new("touch-one/a").hex());
    assert!(snapshot.join("cache/github.db.gz").exists());
    assert!(!fixture.layout.shared_artifacts().join("github.db").exists());
    assert!(fixture.layout.shared_artifacts().join("discourse.db").exists());

    // The next run of the same reference works inside its snapshot, which is
    // compressed again afterwards
    fs::write(&fixture.log, b"").unwrap();
    scheduler
        .run(queue(&["touch-one/a"]), far_deadline())
        .await
        .unwrap();
    let calls = fixture.calls();
    let snapshot_dir = snapshot.display().to_string();
    assert!(calls
        .iter()
        .any(|c| c == &format!("load touch-one/a token=t0ken dir={snapshot_dir}")));
    assert!(snapshot.join("cache/github.db.gz").exists());
    assert!(!snapshot.join("cache/github.db").exists());
}

#[tokio::test]
async fn test_several_touched_artifacts_stay_shared() {
    let fixture = Fixture::new();
    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);

    let result = scheduler
        .run(queue(&["touch-two/a"]), far_deadline())
        .await
        .unwrap();

    assert!(result.succeeded.contains(&RefId::new("touch-two/a")));
    assert_eq!(count(&fixture.layout.instances_dir), 0);
    assert!(fixture.layout.shared_artifacts().join("github.db").exists());
    assert!(fixture.layout.shared_artifacts().join("discourse.db").exists());
}

#[tokio::test]
async fn test_existing_snapshot_runs_isolated() {
    let fixture = Fixture::new();
    let reference = RefId::new("snapshot/a");
    let snapshot = fixture.layout.instances_dir.join(reference.hex());
    fs::create_dir_all(snapshot.join("cache")).unwrap();
    fs::write(snapshot.join("cache/github.db"), b"isolated").unwrap();
    compress_tree(&snapshot).unwrap();

    let interrupt = Interrupt::new();
    let mut scheduler = fixture.scheduler(&interrupt);
    let result = scheduler
        .run(queue(&["snapshot/a"]), far_deadline())
        .await
        .unwrap();
    assert!(result.succeeded.contains(&reference));

    let snapshot_dir = snapshot.display().to_string();
    let calls = fixture.calls();
    assert_eq!(
        calls,
        vec![
            format!("load snapshot/a token=t0ken dir={snapshot_dir}"),
            "seen=isolated".to_string(),
            format!("scores snapshot/a token=none dir={snapshot_dir}"),
        ]
    );

    // Back in durable form, carrying what the job wrote
    assert!(!snapshot.join("cache/github.db").exists());
    assert!(snapshot.join("cache/github.db.gz").exists());
    decompress_tree(&snapshot).unwrap();
    assert_eq!(fs::read(snapshot.join("cache/github.db")).unwrap(), b"updated");

    // The shared baseline is left alone
    assert_eq!(
        fs::read(fixture.layout.shared_artifacts().join("github.db")).unwrap(),
        b"stale"
    );
    assert!(scheduler.ledger().last_scored(&reference).is_some());
}
