//! Cadence Config
//!
//! This crate contains the serializable pipeline configuration types for cadence.
//! These types represent pipeline definitions before they are validated and
//! turned into an executable job graph by `cadence-workflow`.
//!
//! Configuration can be loaded from:
//! - YAML files (the default format)
//! - JSON files (selected by a `.json` extension)
//!
//! # Example
//!
//! ```yaml
//! concurrency: 2
//! jobs:
//!   fetch:
//!     steps:
//!       - run: cargo fetch
//!   test:
//!     steps:
//!       - run: { name: Test, command: cargo test, no_output_timeout: 10m }
//! workflow:
//!   fetch: {}
//!   test: { requires: [fetch] }
//! ```

mod duration;
mod error;
mod job;
mod load;
mod pipeline;
mod step;

pub use duration::{DurationValue, parse_duration};
pub use error::LoadError;
pub use job::JobDef;
pub use load::Format;
pub use pipeline::{PipelineDef, WorkflowEntry};
pub use step::{OutputPruning, RestoreCacheDef, RunDef, RunSpec, SaveCacheDef, StepDef};
