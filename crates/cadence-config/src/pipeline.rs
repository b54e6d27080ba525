use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::JobDef;

/// A complete pipeline file: job definitions plus the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDef {
  /// Default concurrency ceiling; the CLI flag takes precedence.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub concurrency: Option<usize>,
  pub jobs: BTreeMap<String, JobDef>,
  /// Jobs to run and their requirements. When absent every job runs
  /// with no dependencies.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow: Option<BTreeMap<String, WorkflowEntry>>,
}

/// One job's entry in the `workflow:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowEntry {
  #[serde(default)]
  pub requires: Vec<String>,
}

impl PipelineDef {
  /// Workflow entries, defaulting to every job with no requirements.
  pub fn workflow_entries(&self) -> BTreeMap<String, WorkflowEntry> {
    match &self.workflow {
      Some(workflow) => workflow.clone(),
      None => self
        .jobs
        .keys()
        .map(|name| (name.clone(), WorkflowEntry::default()))
        .collect(),
    }
  }
}
