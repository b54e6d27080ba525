use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::step::StepDef;

fn default_resource_class() -> String {
  "medium".to_string()
}

/// A job definition as written under `jobs:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDef {
  /// Execution environment tag, e.g. a container image name.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  #[serde(default = "default_resource_class")]
  pub resource_class: String,
  /// Relative to the runner's working directory.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub working_directory: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub environment: BTreeMap<String, String>,
  /// Shell invocation the command is appended to, e.g. `"/bin/bash -eo pipefail -c"`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shell: Option<String>,
  pub steps: Vec<StepDef>,
}
