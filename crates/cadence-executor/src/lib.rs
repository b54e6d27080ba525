//! Job execution for cadence pipelines.
//!
//! This crate provides the [`JobExecutor`] trait the scheduler dispatches
//! through, and [`ShellExecutor`], which runs a job's steps one after another
//! as local shell processes.
//!
//! A job's steps run strictly in order. The first failing step aborts the
//! rest, and the job's [`JobOutcome`] carries the [`StepError`] that stopped
//! it. Output is streamed line by line to an [`ExecutionNotifier`] as it is
//! produced; the output kept in each [`StepResult`] is subject to the step's
//! pruning policy.
//!
//! Cache steps never fail a job: any cache problem is logged and treated as
//! a miss.

mod error;
mod events;
mod executor;
mod output;
mod result;

pub use error::StepError;
pub use events::{
  ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier, TracingNotifier,
};
pub use executor::{
  DEFAULT_NO_OUTPUT_TIMEOUT, ExecutorConfig, JobContext, JobExecutor, ShellExecutor,
};
pub use result::{CacheOutcome, JobOutcome, StepResult, StepStatus};
