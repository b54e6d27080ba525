//! Cadence Scheduler
//!
//! This crate drives a validated [`Pipeline`] to completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - owns the RunTable (one Run per job)                      │
//! │  - dispatches ready jobs up to the concurrency ceiling      │
//! │  - marks transitive dependents of a failed job skipped      │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       JobExecutor                           │
//! │  - execute(job, ctx) → JobOutcome                           │
//! │  - ShellExecutor runs steps as local processes              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cadence_scheduler::{Scheduler, ShellExecutor, ExecutorConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let executor = Arc::new(ShellExecutor::new(ExecutorConfig::new("."), cache));
//! let scheduler = Scheduler::new(executor, 4);
//! let report = scheduler.run(&pipeline, CancellationToken::new()).await;
//! assert!(report.success);
//! ```
//!
//! [`Pipeline`]: cadence_workflow::Pipeline

mod run;
mod scheduler;

pub use run::{Run, RunStatus, RunTable};
pub use scheduler::{PipelineReport, Scheduler};

// Re-export the executor surface so callers need a single dependency
pub use cadence_executor::{
  ChannelNotifier, ExecutionEvent, ExecutionNotifier, ExecutorConfig, JobContext, JobExecutor,
  JobOutcome, NoopNotifier, ShellExecutor, StepError, TracingNotifier,
};
