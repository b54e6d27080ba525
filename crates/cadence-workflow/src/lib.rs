//! Cadence Workflow
//!
//! This crate provides the validated, immutable representation of a pipeline.
//! A [`Pipeline`] is built from a `cadence-config` [`PipelineDef`] and is the
//! job registry the scheduler dispatches from.
//!
//! Key differences from `cadence-config`:
//! - Every `requires` reference resolves to a registered job
//! - The dependency graph is acyclic and free of self-references
//! - Steps are normalized (one kind per step, durations parsed)
//! - Entry points and a deterministic topological order are available
//!
//! [`PipelineDef`]: cadence_config::PipelineDef

mod error;
mod graph;
mod job;
mod pipeline;

pub use error::ConfigError;
pub use graph::Graph;
pub use job::{Job, RestoreCacheStep, RunStep, SaveCacheStep, Step};
pub use pipeline::Pipeline;
