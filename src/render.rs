//! Terminal output for the CLI: live job output, the run summary and the
//! graph listing.

use std::fmt::Write as _;
use std::io::Write;

use cadence_scheduler::{
  ExecutionEvent, ExecutionNotifier, PipelineReport, RunStatus, TracingNotifier,
};
use cadence_workflow::Pipeline;
use tokio::sync::mpsc;

/// Print events as they arrive until every sender is dropped.
///
/// Lines go to stdout, or to stderr when stdout is reserved for the JSON
/// report. Every event is also forwarded to `tracing`.
pub async fn print_events(mut rx: mpsc::UnboundedReceiver<ExecutionEvent>, to_stderr: bool) {
  let tracer = TracingNotifier;

  while let Some(event) = rx.recv().await {
    if let Some(line) = event_line(&event) {
      // Broken pipes are not worth failing the run over
      let _ = if to_stderr {
        writeln!(std::io::stderr().lock(), "{line}")
      } else {
        writeln!(std::io::stdout().lock(), "{line}")
      };
    }
    tracer.notify(event);
  }
}

fn event_line(event: &ExecutionEvent) -> Option<String> {
  match event {
    ExecutionEvent::JobStarted { job, .. } => Some(format!("[{job}] started")),
    ExecutionEvent::StepStarted { job, name, .. } => Some(format!("[{job}] $ {name}")),
    ExecutionEvent::StepOutput { job, line, .. } => Some(format!("[{job}] {line}")),
    ExecutionEvent::JobFinished {
      job,
      success: true,
      duration_ms,
      ..
    } => Some(format!("[{job}] succeeded in {}", seconds(*duration_ms))),
    ExecutionEvent::JobFinished { job, error, .. } => Some(format!(
      "[{job}] failed: {}",
      error.as_deref().unwrap_or("unknown error")
    )),
    ExecutionEvent::JobSkipped { job, reason, .. } => Some(format!("[{job}] skipped: {reason}")),
    ExecutionEvent::PipelineStarted { .. }
    | ExecutionEvent::StepFinished { .. }
    | ExecutionEvent::PipelineFinished { .. } => None,
  }
}

fn seconds(ms: u64) -> String {
  format!("{:.2}s", ms as f64 / 1000.0)
}

/// Summary table of a finished run.
pub fn summary(report: &PipelineReport) -> String {
  let width = report
    .runs
    .iter()
    .map(|run| run.job.len())
    .max()
    .unwrap_or(0)
    .max("JOB".len());

  let mut out = String::new();
  let _ = writeln!(out);
  let _ = writeln!(out, "{:<width$}  {:<9}  {:>8}  DETAIL", "JOB", "STATUS", "TIME");
  for run in &report.runs {
    let time = run.duration_ms.map(seconds).unwrap_or_default();
    let detail = match run.status {
      RunStatus::Failed => run.error.clone().unwrap_or_default(),
      RunStatus::Skipped => match &run.skipped_because {
        Some(job) => format!("requires '{job}'"),
        None if report.cancelled => "cancelled".to_string(),
        None => String::new(),
      },
      _ => String::new(),
    };
    let _ = writeln!(
      out,
      "{:<width$}  {:<9}  {:>8}  {}",
      run.job,
      run.status.to_string(),
      time,
      detail
    );
  }

  let _ = writeln!(
    out,
    "\n{} succeeded, {} failed, {} skipped in {}{}",
    report.count(RunStatus::Succeeded),
    report.count(RunStatus::Failed),
    report.count(RunStatus::Skipped),
    seconds(report.duration_ms),
    if report.cancelled { " (cancelled)" } else { "" }
  );
  out
}

/// Jobs in dispatch order, each with the jobs it requires.
pub fn graph(pipeline: &Pipeline) -> String {
  let graph = pipeline.graph();
  let mut out = String::new();
  for job in graph.topological_order() {
    let upstream = graph.upstream(&job);
    if upstream.is_empty() {
      let _ = writeln!(out, "{job}");
    } else {
      let _ = writeln!(out, "{job} <- {}", upstream.join(", "));
    }
  }
  out
}
