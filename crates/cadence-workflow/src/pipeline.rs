use std::collections::BTreeMap;

use cadence_config::PipelineDef;
use tracing::debug;

use crate::error::ConfigError;
use crate::graph::Graph;
use crate::job::Job;

/// A validated pipeline ready for scheduling.
///
/// Holds the registered jobs and the dependency graph over them. Only jobs
/// listed in the workflow are registered.
#[derive(Debug, Clone)]
pub struct Pipeline {
  jobs: BTreeMap<String, Job>,
  graph: Graph,
  concurrency: Option<usize>,
}

impl Pipeline {
  /// Validate a pipeline definition and build the job graph.
  pub fn build(def: &PipelineDef) -> Result<Self, ConfigError> {
    if def.concurrency == Some(0) {
      return Err(ConfigError::InvalidConcurrency);
    }

    let entries = def.workflow_entries();
    if entries.is_empty() {
      return Err(ConfigError::EmptyWorkflow);
    }

    for job in entries.keys() {
      if !def.jobs.contains_key(job) {
        return Err(ConfigError::UnknownJob { job: job.clone() });
      }
    }

    let requirements: BTreeMap<String, Vec<String>> = entries
      .iter()
      .map(|(job, entry)| (job.clone(), entry.requires.clone()))
      .collect();
    let graph = Graph::build(&requirements)?;

    let mut jobs = BTreeMap::new();
    for (id, requires) in requirements {
      let job = Job::from_def(&id, &def.jobs[&id], requires)?;
      jobs.insert(id, job);
    }

    debug!(
      jobs = jobs.len(),
      entry_points = ?graph.entry_points(),
      "pipeline_built"
    );

    Ok(Self {
      jobs,
      graph,
      concurrency: def.concurrency,
    })
  }

  /// Get a job by ID.
  pub fn job(&self, job_id: &str) -> Option<&Job> {
    self.jobs.get(job_id)
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Concurrency ceiling requested by the pipeline file, if any.
  pub fn concurrency(&self) -> Option<usize> {
    self.concurrency
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use cadence_config::Format;

  use super::*;
  use crate::job::Step;

  fn build(yaml: &str) -> Result<Pipeline, ConfigError> {
    let def = PipelineDef::parse(yaml, Format::Yaml).expect("valid yaml");
    Pipeline::build(&def)
  }

  #[test]
  fn builds_pipeline_with_normalized_steps() {
    let pipeline = build(
      r#"
jobs:
  fetch:
    working_directory: app
    shell: /bin/bash -eo pipefail -c
    steps:
      - restore_cache: { key: "deps-{{ checksum('Cargo.lock') }}", keys: ["deps-"] }
      - run: cargo fetch
      - run: { name: Check, command: cargo check, no_output_timeout: 90s }
      - save_cache: { key: "deps-{{ checksum('Cargo.lock') }}", paths: [target] }
  test:
    steps:
      - run: cargo test
  unused:
    steps:
      - run: echo never
workflow:
  fetch: {}
  test: { requires: [fetch] }
"#,
    )
    .unwrap();

    assert_eq!(pipeline.len(), 2);
    assert!(pipeline.job("unused").is_none());

    let fetch = pipeline.job("fetch").unwrap();
    assert_eq!(fetch.shell, vec!["/bin/bash", "-eo", "pipefail", "-c"]);
    assert_eq!(fetch.working_directory.as_deref(), Some(std::path::Path::new("app")));
    assert_eq!(fetch.steps.len(), 4);
    match &fetch.steps[0] {
      Step::RestoreCache(step) => assert_eq!(step.keys.len(), 2),
      other => panic!("unexpected step {other:?}"),
    }
    match &fetch.steps[1] {
      Step::Run(step) => {
        assert_eq!(step.name, "cargo fetch");
        assert!(step.no_output_timeout.is_none());
      }
      other => panic!("unexpected step {other:?}"),
    }
    match &fetch.steps[2] {
      Step::Run(step) => {
        assert_eq!(step.name, "Check");
        assert_eq!(step.no_output_timeout, Some(Duration::from_secs(90)));
      }
      other => panic!("unexpected step {other:?}"),
    }

    let test = pipeline.job("test").unwrap();
    assert_eq!(test.shell, vec!["/bin/sh", "-c"]);
    assert_eq!(test.requires, vec!["fetch"]);
    assert_eq!(pipeline.graph().topological_order(), vec!["fetch", "test"]);
  }

  #[test]
  fn rejects_cycle_before_anything_runs() {
    let err = build(
      r#"
jobs:
  a: { steps: [ { run: "true" } ] }
  b: { steps: [ { run: "true" } ] }
workflow:
  a: { requires: [b] }
  b: { requires: [a] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Cycle { .. }));
  }

  #[test]
  fn rejects_workflow_entry_without_job() {
    let err = build(
      r#"
jobs:
  a: { steps: [ { run: "true" } ] }
workflow:
  a: {}
  deploy: { requires: [a] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownJob { job } if job == "deploy"));
  }

  #[test]
  fn rejects_step_without_kind() {
    let err = build(
      r#"
jobs:
  a: { steps: [ {} ] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidStep { index: 0, .. }));
  }

  #[test]
  fn rejects_step_with_two_kinds() {
    let err = build(
      r#"
jobs:
  a:
    steps:
      - run: "true"
        save_cache: { key: k, paths: [p] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidStep { .. }));
  }

  #[test]
  fn rejects_bad_duration() {
    let err = build(
      r#"
jobs:
  a:
    steps:
      - run: { command: "true", no_output_timeout: soon }
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("invalid duration"), "{err}");
  }

  #[test]
  fn rejects_zero_concurrency() {
    let err = build(
      r#"
concurrency: 0
jobs:
  a: { steps: [ { run: "true" } ] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidConcurrency));
  }

  #[test]
  fn rejects_empty_workflow() {
    let err = build("jobs: {}\n").unwrap_err();
    assert!(matches!(err, ConfigError::EmptyWorkflow));
  }
}
