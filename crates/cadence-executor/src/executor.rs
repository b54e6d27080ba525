//! Shell job executor.
//!
//! Handles spawning step processes, streaming their output, enforcing
//! no-output timeouts and running cache steps.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use cadence_cache::{CacheError, CacheStore, KeyContext, pack_paths, render_key, unpack};
use cadence_workflow::{Job, RestoreCacheStep, RunStep, SaveCacheStep, Step};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::StepError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::output::{MAX_LINE_LENGTH, RetainedOutput, truncate_line};
use crate::result::{CacheOutcome, JobOutcome, StepResult, StepStatus};

/// Bound on silence from a `run` step when the step sets none.
pub const DEFAULT_NO_OUTPUT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Lines buffered between the output readers and the step loop.
const OUTPUT_BUFFER: usize = 256;

/// Time a step's process group gets to exit after SIGTERM before SIGKILL.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Configuration for the shell executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Directory job working directories are resolved against.
  pub workdir: PathBuf,
  /// Applied to `run` steps without their own `no_output_timeout`.
  pub no_output_timeout: Duration,
}

impl ExecutorConfig {
  pub fn new(workdir: impl Into<PathBuf>) -> Self {
    Self {
      workdir: workdir.into(),
      no_output_timeout: DEFAULT_NO_OUTPUT_TIMEOUT,
    }
  }
}

/// Per-dispatch context handed to an executor by the scheduler.
#[derive(Clone)]
pub struct JobContext {
  pub run_id: String,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub cancel: CancellationToken,
}

/// Executes a single job.
///
/// Implementations never panic on step failure; everything that stops a job
/// is reported through [`JobOutcome::error`].
#[async_trait]
pub trait JobExecutor: Send + Sync {
  async fn execute(&self, job: &Job, ctx: &JobContext) -> JobOutcome;
}

/// Runs job steps as local shell processes.
pub struct ShellExecutor {
  config: ExecutorConfig,
  cache: Arc<dyn CacheStore>,
}

enum ExitReason {
  Completed(ExitStatus),
  WaitError(std::io::Error),
  Timeout,
  Cancelled,
}

impl ShellExecutor {
  pub fn new(config: ExecutorConfig, cache: Arc<dyn CacheStore>) -> Self {
    Self { config, cache }
  }

  fn job_dir(&self, job: &Job) -> PathBuf {
    match &job.working_directory {
      Some(dir) => self.config.workdir.join(dir),
      None => self.config.workdir.clone(),
    }
  }

  fn key_context(&self, job: &Job, dir: &Path) -> KeyContext {
    KeyContext {
      job: job.id.clone(),
      working_dir: dir.to_path_buf(),
      env: job.environment.clone(),
    }
  }

  /// Run one `run` step. Returns the retained output and the exit code, or
  /// the error that stopped the step.
  #[instrument(name = "step_run", skip_all, fields(job = %job.id, step = %step.name))]
  async fn run_step(
    &self,
    job: &Job,
    step: &RunStep,
    dir: &Path,
    ctx: &JobContext,
  ) -> (Vec<String>, Result<i32, StepError>) {
    let timeout = step
      .no_output_timeout
      .unwrap_or(self.config.no_output_timeout);
    let mut retained = RetainedOutput::new(step.pruning);

    let mut child = match self.spawn(job, step, dir, ctx) {
      Ok(child) => child,
      Err(source) => {
        return (
          Vec::new(),
          Err(StepError::Spawn {
            step: step.name.clone(),
            source,
          }),
        );
      }
    };

    // Combined stdout/stderr; the channel closes once both streams hit EOF
    let (tx, mut rx) = mpsc::channel::<String>(OUTPUT_BUFFER);
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.inner().stdout.take() {
      readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
    }
    if let Some(stderr) = child.inner().stderr.take() {
      readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
    }
    drop(tx);

    let interrupted = loop {
      tokio::select! {
        line = rx.recv() => match line {
          Some(line) => {
            ctx.notifier.notify(ExecutionEvent::StepOutput {
              run_id: ctx.run_id.clone(),
              job: job.id.clone(),
              step: step.name.clone(),
              line: line.clone(),
            });
            retained.push(&line);
          }
          None => break None,
        },
        _ = tokio::time::sleep(timeout) => break Some(ExitReason::Timeout),
        _ = ctx.cancel.cancelled() => break Some(ExitReason::Cancelled),
      }
    };

    // Output closed; the process may still be running silently
    let exit_reason = match interrupted {
      Some(reason) => reason,
      None => tokio::select! {
        status = child.wait() => match status {
          Ok(status) => ExitReason::Completed(status),
          Err(e) => ExitReason::WaitError(e),
        },
        _ = tokio::time::sleep(timeout) => ExitReason::Timeout,
        _ = ctx.cancel.cancelled() => ExitReason::Cancelled,
      },
    };

    let result = match exit_reason {
      ExitReason::Completed(status) => {
        let exit_code = status.code().unwrap_or(-1);
        if status.success() {
          Ok(exit_code)
        } else {
          Err(StepError::Failed {
            step: step.name.clone(),
            exit_code,
          })
        }
      }
      ExitReason::WaitError(source) => Err(StepError::Spawn {
        step: step.name.clone(),
        source,
      }),
      ExitReason::Timeout => {
        warn!(timeout_ms = timeout.as_millis() as u64, "step_timed_out");
        terminate(&mut child).await;
        Err(StepError::Timeout {
          step: step.name.clone(),
          after: timeout,
        })
      }
      ExitReason::Cancelled => {
        info!("step_cancelled");
        terminate(&mut child).await;
        Err(StepError::Cancelled)
      }
    };

    for reader in readers {
      reader.abort();
    }

    (retained.into_lines(), result)
  }

  fn spawn(
    &self,
    job: &Job,
    step: &RunStep,
    dir: &Path,
    ctx: &JobContext,
  ) -> std::io::Result<AsyncGroupChild> {
    let Some((program, args)) = job.shell.split_first() else {
      return Err(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "empty shell",
      ));
    };

    debug!(shell = ?job.shell, command = %step.command, dir = %dir.display(), "spawning_step");

    let mut cmd = Command::new(program);
    cmd
      .args(args)
      .arg(&step.command)
      .current_dir(dir)
      .envs(&job.environment)
      .envs(&step.environment)
      .env("CADENCE_JOB", &job.id)
      .env("CADENCE_RUN_ID", &ctx.run_id)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    // Own process group, so timeouts and cancellation reach every descendant
    cmd.group_spawn()
  }

  /// Try each key in order: exact match first, then the newest entry with
  /// the key as a prefix.
  #[instrument(name = "step_restore_cache", skip_all, fields(job = %job.id))]
  async fn restore_cache(&self, job: &Job, step: &RestoreCacheStep, dir: &Path) -> CacheOutcome {
    let key_ctx = self.key_context(job, dir);

    for template in &step.keys {
      let key = match render_key(template, &key_ctx) {
        Ok(key) => key,
        Err(e) => {
          warn!(error = %e, "cache_key_render_failed");
          continue;
        }
      };

      match self.restore_key(&key, dir).await {
        Ok(Some(found)) => {
          info!(key = %found, "cache_restored");
          return CacheOutcome::Restored { key: found };
        }
        Ok(None) => debug!(key = %key, "cache_miss"),
        Err(e) => warn!(key = %key, error = %e, "cache_restore_failed"),
      }
    }

    info!("cache_miss");
    CacheOutcome::Miss
  }

  async fn restore_key(&self, key: &str, dir: &Path) -> Result<Option<String>, CacheError> {
    let found = if self.cache.contains(key).await? {
      Some(key.to_string())
    } else {
      self.cache.find_prefix(key).await?
    };
    let Some(found) = found else {
      return Ok(None);
    };
    let Some(blob) = self.cache.get(&found).await? else {
      return Ok(None);
    };

    let root = dir.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&root, &blob))
      .await
      .map_err(|e| CacheError::Archive {
        message: e.to_string(),
      })??;
    Ok(Some(found))
  }

  #[instrument(name = "step_save_cache", skip_all, fields(job = %job.id))]
  async fn save_cache(&self, job: &Job, step: &SaveCacheStep, dir: &Path) -> CacheOutcome {
    match self.try_save_cache(job, step, dir).await {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(error = %e, "cache_save_failed");
        CacheOutcome::Error {
          message: e.to_string(),
        }
      }
    }
  }

  async fn try_save_cache(
    &self,
    job: &Job,
    step: &SaveCacheStep,
    dir: &Path,
  ) -> Result<CacheOutcome, CacheError> {
    let key = render_key(&step.key, &self.key_context(job, dir))?;
    if self.cache.contains(&key).await? {
      info!(key = %key, "cache_exists");
      return Ok(CacheOutcome::Exists { key });
    }

    let root = dir.to_path_buf();
    let paths = step.paths.clone();
    let blob = tokio::task::spawn_blocking(move || pack_paths(&root, &paths))
      .await
      .map_err(|e| CacheError::Archive {
        message: e.to_string(),
      })??;

    let size = blob.len();
    self.cache.put(&key, blob).await?;
    info!(key = %key, bytes = size, "cache_saved");
    Ok(CacheOutcome::Saved { key })
  }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
  #[instrument(name = "job_execute", skip_all, fields(run_id = %ctx.run_id, job = %job.id))]
  async fn execute(&self, job: &Job, ctx: &JobContext) -> JobOutcome {
    let dir = self.job_dir(job);
    if let Err(source) = tokio::fs::create_dir_all(&dir).await {
      return JobOutcome::failed(
        Vec::new(),
        StepError::WorkingDirectory { path: dir, source },
      );
    }

    let mut results = Vec::with_capacity(job.steps.len());
    for (index, step) in job.steps.iter().enumerate() {
      if ctx.cancel.is_cancelled() {
        return JobOutcome::failed(results, StepError::Cancelled);
      }

      let name = step.name().to_string();
      ctx.notifier.notify(ExecutionEvent::StepStarted {
        run_id: ctx.run_id.clone(),
        job: job.id.clone(),
        index,
        name: name.clone(),
      });
      let started = Instant::now();

      let (mut result, error) = match step {
        Step::Run(run) => {
          let (output, outcome) = self.run_step(job, run, &dir, ctx).await;
          let exit_code = match &outcome {
            Ok(code) => Some(*code),
            Err(StepError::Failed { exit_code, .. }) => Some(*exit_code),
            Err(_) => None,
          };
          let status = if outcome.is_ok() {
            StepStatus::Succeeded
          } else {
            StepStatus::Failed
          };
          (
            StepResult {
              name: name.clone(),
              status,
              exit_code,
              duration_ms: 0,
              output,
              cache: None,
            },
            outcome.err(),
          )
        }
        Step::RestoreCache(restore) => {
          let outcome = self.restore_cache(job, restore, &dir).await;
          (cache_step_result(&name, outcome), None)
        }
        Step::SaveCache(save) => {
          let outcome = self.save_cache(job, save, &dir).await;
          (cache_step_result(&name, outcome), None)
        }
      };

      result.duration_ms = started.elapsed().as_millis() as u64;
      ctx.notifier.notify(ExecutionEvent::StepFinished {
        run_id: ctx.run_id.clone(),
        job: job.id.clone(),
        index,
        name,
        success: error.is_none(),
        duration_ms: result.duration_ms,
      });
      results.push(result);

      if let Some(error) = error {
        warn!(index, error = %error, "step_failed");
        return JobOutcome::failed(results, error);
      }
    }

    JobOutcome::succeeded(results)
  }
}

fn cache_step_result(name: &str, outcome: CacheOutcome) -> StepResult {
  StepResult {
    name: name.to_string(),
    status: StepStatus::Succeeded,
    exit_code: None,
    duration_ms: 0,
    output: Vec::new(),
    cache: Some(outcome),
  }
}

/// Forward lines from one output stream until EOF or until the step loop
/// stops listening. Invalid UTF-8 is replaced rather than dropped.
///
/// At most one byte past [`MAX_LINE_LENGTH`] of a line is buffered; the rest
/// is discarded up to the next newline, so a step printing without newlines
/// cannot grow the runner's memory.
async fn forward_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::Sender<String>) {
  let mut reader = BufReader::new(stream);
  let mut buf = Vec::new();

  loop {
    let (consumed, complete) = match reader.fill_buf().await {
      Ok([]) => {
        if !buf.is_empty() {
          let _ = tx.send(finish_line(&buf)).await;
        }
        break;
      }
      Ok(available) => {
        let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
          Some(end) => (&available[..end], end + 1, true),
          None => (available, available.len(), false),
        };
        let room = (MAX_LINE_LENGTH + 1).saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        (consumed, complete)
      }
      Err(e) => {
        warn!(error = %e, "output_read_failed");
        break;
      }
    };
    reader.consume(consumed);

    if complete {
      if tx.send(finish_line(&buf)).await.is_err() {
        break;
      }
      buf.clear();
    }
  }
}

fn finish_line(buf: &[u8]) -> String {
  let line = String::from_utf8_lossy(buf);
  truncate_line(line.trim_end_matches('\r').to_string(), MAX_LINE_LENGTH)
}

/// Stop a step's whole process group: SIGTERM, a grace period, then SIGKILL.
#[cfg(unix)]
async fn terminate(child: &mut AsyncGroupChild) {
  use nix::errno::Errno;
  use nix::sys::signal::{Signal, killpg};
  use nix::unistd::Pid;

  let Some(pid) = child.inner().id() else {
    return;
  };
  let group = Pid::from_raw(pid as i32);

  if let Err(e) = killpg(group, Signal::SIGTERM)
    && e != Errno::ESRCH
  {
    warn!(pid, error = %e, "sigterm_failed");
  }

  let deadline = tokio::time::Instant::now() + GRACE_PERIOD;
  while tokio::time::Instant::now() < deadline {
    if matches!(child.try_wait(), Ok(Some(_))) {
      break;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }

  // The leader may be gone while descendants still hold the group
  if let Err(e) = killpg(group, Signal::SIGKILL)
    && e != Errno::ESRCH
  {
    debug!(pid, error = %e, "sigkill_failed");
  }
  let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut AsyncGroupChild) {
  if let Err(e) = child.kill().await {
    debug!(error = %e, "kill_failed");
  }
  let _ = child.wait().await;
}
