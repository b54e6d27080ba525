//! Integration tests for Scheduler dispatch, skip propagation and cancellation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_cache::MemoryCache;
use cadence_config::{Format, PipelineDef};
use cadence_scheduler::{
  ChannelNotifier, ExecutionEvent, ExecutorConfig, JobContext, JobExecutor, JobOutcome,
  RunStatus, Scheduler, ShellExecutor, StepError,
};
use cadence_workflow::{Job, Pipeline};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Executor that sleeps instead of running steps and records what it saw.
#[derive(Default)]
struct MockExecutor {
  failing: BTreeSet<String>,
  panicking: BTreeSet<String>,
  delay: Duration,
  running: AtomicUsize,
  max_running: AtomicUsize,
  executed: Mutex<Vec<String>>,
}

impl MockExecutor {
  fn with_delay(delay: Duration) -> Self {
    Self {
      delay,
      ..Self::default()
    }
  }

  fn failing(mut self, jobs: &[&str]) -> Self {
    self.failing = jobs.iter().map(|j| j.to_string()).collect();
    self
  }

  fn executed(&self) -> Vec<String> {
    self.executed.lock().unwrap().clone()
  }
}

#[async_trait]
impl JobExecutor for MockExecutor {
  async fn execute(&self, job: &Job, ctx: &JobContext) -> JobOutcome {
    self.executed.lock().unwrap().push(job.id.clone());
    if self.panicking.contains(&job.id) {
      panic!("executor blew up on {}", job.id);
    }

    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_running.fetch_max(now, Ordering::SeqCst);

    let cancelled = tokio::select! {
      _ = tokio::time::sleep(self.delay) => false,
      _ = ctx.cancel.cancelled() => true,
    };
    self.running.fetch_sub(1, Ordering::SeqCst);

    if cancelled {
      JobOutcome::failed(Vec::new(), StepError::Cancelled)
    } else if self.failing.contains(&job.id) {
      JobOutcome::failed(
        Vec::new(),
        StepError::Failed {
          step: "run".to_string(),
          exit_code: 1,
        },
      )
    } else {
      JobOutcome::succeeded(Vec::new())
    }
  }
}

fn pipeline(yaml: &str) -> Pipeline {
  let def = PipelineDef::parse(yaml, Format::Yaml).expect("valid pipeline yaml");
  Pipeline::build(&def).expect("valid pipeline")
}

const CHAIN: &str = r#"
jobs:
  a: { steps: [ { run: "true" } ] }
  b: { steps: [ { run: "true" } ] }
  c: { steps: [ { run: "true" } ] }
workflow:
  a: {}
  b: { requires: [a] }
  c: { requires: [b] }
"#;

#[tokio::test]
async fn failure_skips_transitive_dependents() {
  let executor = Arc::new(MockExecutor::default().failing(&["a"]));
  let scheduler = Scheduler::new(executor.clone(), 4);

  let report = scheduler
    .run(&pipeline(CHAIN), CancellationToken::new())
    .await;

  assert!(!report.success);
  assert_eq!(report.status("a"), Some(RunStatus::Failed));
  assert_eq!(report.status("b"), Some(RunStatus::Skipped));
  assert_eq!(report.status("c"), Some(RunStatus::Skipped));
  assert_eq!(
    report.run("c").unwrap().skipped_because.as_deref(),
    Some("a")
  );
  assert_eq!(executor.executed(), vec!["a"]);
}

#[tokio::test]
async fn chain_runs_in_order_when_everything_succeeds() {
  let executor = Arc::new(MockExecutor::default());
  let report = Scheduler::new(executor.clone(), 4)
    .run(&pipeline(CHAIN), CancellationToken::new())
    .await;

  assert!(report.success);
  assert_eq!(report.count(RunStatus::Succeeded), 3);
  assert_eq!(executor.executed(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn ceiling_is_never_exceeded() {
  let yaml = r#"
jobs:
  j1: { steps: [ { run: "true" } ] }
  j2: { steps: [ { run: "true" } ] }
  j3: { steps: [ { run: "true" } ] }
  j4: { steps: [ { run: "true" } ] }
  j5: { steps: [ { run: "true" } ] }
  j6: { steps: [ { run: "true" } ] }
  j7: { steps: [ { run: "true" } ] }
  j8: { steps: [ { run: "true" } ] }
"#;

  for ceiling in [1, 3] {
    let executor = Arc::new(MockExecutor::with_delay(Duration::from_millis(30)));
    let report = Scheduler::new(executor.clone(), ceiling)
      .run(&pipeline(yaml), CancellationToken::new())
      .await;

    assert!(report.success);
    assert_eq!(executor.executed().len(), 8);
    let max = executor.max_running.load(Ordering::SeqCst);
    assert!(max <= ceiling, "ceiling {ceiling} exceeded: {max}");
    assert!(max >= 1);
  }
}

#[tokio::test]
async fn zero_ceiling_is_raised_to_one() {
  let scheduler = Scheduler::new(Arc::new(MockExecutor::default()), 0);
  assert_eq!(scheduler.concurrency(), 1);
}

#[tokio::test]
async fn siblings_continue_after_failure() {
  let yaml = r#"
jobs:
  a: { steps: [ { run: "true" } ] }
  b: { steps: [ { run: "true" } ] }
  c: { steps: [ { run: "true" } ] }
  d: { steps: [ { run: "true" } ] }
workflow:
  a: {}
  b: {}
  c: { requires: [a] }
  d: { requires: [b] }
"#;
  let executor = Arc::new(MockExecutor::with_delay(Duration::from_millis(10)).failing(&["a"]));
  let report = Scheduler::new(executor.clone(), 2)
    .run(&pipeline(yaml), CancellationToken::new())
    .await;

  assert_eq!(report.status("a"), Some(RunStatus::Failed));
  assert_eq!(report.status("b"), Some(RunStatus::Succeeded));
  assert_eq!(report.status("c"), Some(RunStatus::Skipped));
  assert_eq!(report.status("d"), Some(RunStatus::Succeeded));
  assert!(!executor.executed().contains(&"c".to_string()));
}

#[tokio::test]
async fn diamond_dispatches_in_topological_order() {
  let yaml = r#"
jobs:
  fetch: { steps: [ { run: "true" } ] }
  test: { steps: [ { run: "true" } ] }
  lint: { steps: [ { run: "true" } ] }
  publish: { steps: [ { run: "true" } ] }
workflow:
  fetch: {}
  test: { requires: [fetch] }
  lint: { requires: [fetch] }
  publish: { requires: [test, lint] }
"#;
  let executor = Arc::new(MockExecutor::default());
  let report = Scheduler::new(executor.clone(), 1)
    .run(&pipeline(yaml), CancellationToken::new())
    .await;

  assert!(report.success);
  assert_eq!(executor.executed(), vec!["fetch", "lint", "test", "publish"]);
  let order: Vec<_> = report.runs.iter().map(|run| run.job.as_str()).collect();
  assert_eq!(order, vec!["fetch", "lint", "test", "publish"]);
}

#[tokio::test]
async fn skipped_jobs_never_start() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let executor = Arc::new(MockExecutor::default().failing(&["a"]));
  let scheduler = Scheduler::with_notifier(executor, 4, Arc::new(ChannelNotifier::new(tx)));

  let report = scheduler
    .run(&pipeline(CHAIN), CancellationToken::new())
    .await;

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(
    events.first(),
    Some(ExecutionEvent::PipelineStarted { jobs: 3, .. })
  ));
  assert!(matches!(
    events.last(),
    Some(ExecutionEvent::PipelineFinished { success: false, .. })
  ));
  for event in &events {
    if let ExecutionEvent::JobStarted { job, .. } = event {
      assert_eq!(job, "a");
    }
  }
  let skipped: Vec<_> = events
    .iter()
    .filter_map(|event| match event {
      ExecutionEvent::JobSkipped { job, run_id, .. } => {
        assert_eq!(run_id, &report.run_id);
        Some(job.as_str())
      }
      _ => None,
    })
    .collect();
  assert_eq!(skipped, vec!["b", "c"]);
}

#[tokio::test]
async fn cancellation_fails_running_and_skips_pending() {
  let executor = Arc::new(MockExecutor::with_delay(Duration::from_secs(30)));
  let scheduler = Scheduler::new(executor, 4);
  let cancel = CancellationToken::new();

  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel();
  });

  let report = tokio::time::timeout(
    Duration::from_secs(5),
    scheduler.run(&pipeline(CHAIN), cancel),
  )
  .await
  .expect("scheduler stops promptly after cancellation");

  assert!(report.cancelled);
  assert!(!report.success);
  assert_eq!(report.status("a"), Some(RunStatus::Failed));
  assert_eq!(report.run("a").unwrap().error.as_deref(), Some("cancelled"));
  assert_eq!(report.status("b"), Some(RunStatus::Skipped));
  assert_eq!(report.status("c"), Some(RunStatus::Skipped));
}

#[tokio::test]
async fn panicking_executor_fails_only_its_job() {
  let mut executor = MockExecutor::default();
  executor.panicking.insert("b".to_string());
  let report = Scheduler::new(Arc::new(executor), 2)
    .run(&pipeline(CHAIN), CancellationToken::new())
    .await;

  assert_eq!(report.status("a"), Some(RunStatus::Succeeded));
  assert_eq!(report.status("b"), Some(RunStatus::Failed));
  assert!(
    report
      .run("b")
      .unwrap()
      .error
      .as_deref()
      .unwrap()
      .contains("executor blew up on b")
  );
  assert_eq!(report.status("c"), Some(RunStatus::Skipped));
}

#[tokio::test]
async fn crashed_job_still_finishes_in_report() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let mut executor = MockExecutor::default();
  executor.panicking.insert("a".to_string());
  let scheduler =
    Scheduler::with_notifier(Arc::new(executor), 1, Arc::new(ChannelNotifier::new(tx)));

  let report = scheduler
    .run(&pipeline(CHAIN), CancellationToken::new())
    .await;

  assert!(report.runs.iter().all(|run| run.status.is_terminal()));
  let crashed = report.run("a").unwrap();
  assert_eq!(crashed.status, RunStatus::Failed);
  assert!(crashed.duration_ms.is_some());
  assert!(
    crashed
      .error
      .as_deref()
      .unwrap()
      .starts_with("executor panicked:")
  );

  let mut finished = Vec::new();
  while let Ok(event) = rx.try_recv() {
    if let ExecutionEvent::JobFinished { job, success, .. } = event {
      finished.push((job, success));
    }
  }
  assert_eq!(finished, vec![("a".to_string(), false)]);
}

#[tokio::test]
async fn report_serializes_statuses() {
  let executor = Arc::new(MockExecutor::default().failing(&["a"]));
  let report = Scheduler::new(executor, 1)
    .run(&pipeline(CHAIN), CancellationToken::new())
    .await;

  let json = serde_json::to_value(&report).unwrap();
  assert_eq!(json["success"], false);
  assert_eq!(json["runs"][0]["job"], "a");
  assert_eq!(json["runs"][0]["status"], "failed");
  assert_eq!(json["runs"][1]["status"], "skipped");
  assert_eq!(json["runs"][1]["skipped_because"], "a");
}

#[tokio::test]
async fn shell_pipeline_end_to_end() {
  let dir = tempfile::tempdir().unwrap();
  let yaml = r#"
jobs:
  fetch:
    steps:
      - run: echo fetched > fetched.txt
  test:
    steps:
      - run: test -f fetched.txt
      - run: exit 1
  lint:
    steps:
      - run: test -f fetched.txt
  publish:
    steps:
      - run: touch published
workflow:
  fetch: {}
  test: { requires: [fetch] }
  lint: { requires: [fetch] }
  publish: { requires: [test, lint] }
"#;

  let executor = Arc::new(ShellExecutor::new(
    ExecutorConfig::new(dir.path()),
    Arc::new(MemoryCache::new()),
  ));
  let report = Scheduler::new(executor, 2)
    .run(&pipeline(yaml), CancellationToken::new())
    .await;

  assert_eq!(report.status("fetch"), Some(RunStatus::Succeeded));
  assert_eq!(report.status("lint"), Some(RunStatus::Succeeded));
  assert_eq!(report.status("test"), Some(RunStatus::Failed));
  assert_eq!(report.status("publish"), Some(RunStatus::Skipped));
  assert_eq!(report.run("test").unwrap().steps.len(), 2);
  assert!(!dir.path().join("published").exists());
}
