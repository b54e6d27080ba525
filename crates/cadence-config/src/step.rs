use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::duration::DurationValue;

/// A single entry in a job's `steps` list.
///
/// Written as a map with exactly one key naming the step kind:
///
/// ```yaml
/// steps:
///   - restore_cache: { keys: ["deps-{{ checksum('Cargo.lock') }}"] }
///   - run: cargo build
///   - save_cache: { key: "deps-{{ checksum('Cargo.lock') }}", paths: [target] }
/// ```
///
/// Having exactly one kind set is checked when the pipeline is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run: Option<RunDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub restore_cache: Option<RestoreCacheDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub save_cache: Option<SaveCacheDef>,
}

impl StepDef {
  /// Number of step kinds set on this entry.
  pub fn kind_count(&self) -> usize {
    [
      self.run.is_some(),
      self.restore_cache.is_some(),
      self.save_cache.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count()
  }
}

/// A `run` step: either a bare command or a detailed specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunDef {
  Command(String),
  Detailed(RunSpec),
}

impl RunDef {
  /// Normalize into the detailed form.
  pub fn into_spec(self) -> RunSpec {
    match self {
      RunDef::Command(command) => RunSpec {
        command,
        ..Default::default()
      },
      RunDef::Detailed(spec) => spec,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
  /// Display name, defaults to the command itself.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub command: String,
  /// Fail the step if it produces no output for this long.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub no_output_timeout: Option<DurationValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub prune_output: Option<OutputPruning>,
  /// Extra environment variables, layered over the job's environment.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub environment: BTreeMap<String, String>,
}

/// Limits on how much of a step's output is retained after it finishes.
///
/// Output is always streamed in full; pruning only affects what is kept in
/// the step result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputPruning {
  /// Keep only the last N lines.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub keep_last: Option<usize>,
  /// Truncate lines longer than this many bytes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_line_length: Option<usize>,
}

/// A `restore_cache` step. `key` and `keys` are merged, `key` first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestoreCacheDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub keys: Vec<String>,
}

impl RestoreCacheDef {
  /// All key templates in lookup order.
  pub fn all_keys(&self) -> Vec<String> {
    self.key.iter().chain(self.keys.iter()).cloned().collect()
  }
}

/// A `save_cache` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveCacheDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub key: String,
  pub paths: Vec<String>,
}
