use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use cadence_config::{JobDef, OutputPruning, StepDef};
use serde::Serialize;

use crate::error::ConfigError;

const DEFAULT_SHELL: &str = "/bin/sh -c";

/// A registered job. Immutable once the pipeline is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
  pub id: String,
  pub image: Option<String>,
  pub resource_class: String,
  pub working_directory: Option<PathBuf>,
  pub environment: BTreeMap<String, String>,
  /// Program and leading arguments; the step command is appended last.
  pub shell: Vec<String>,
  pub steps: Vec<Step>,
  /// Jobs that must succeed before this one starts.
  pub requires: Vec<String>,
}

/// A normalized step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
  Run(RunStep),
  RestoreCache(RestoreCacheStep),
  SaveCache(SaveCacheStep),
}

impl Step {
  pub fn name(&self) -> &str {
    match self {
      Step::Run(step) => &step.name,
      Step::RestoreCache(step) => &step.name,
      Step::SaveCache(step) => &step.name,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStep {
  pub name: String,
  pub command: String,
  pub no_output_timeout: Option<Duration>,
  pub pruning: OutputPruning,
  pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreCacheStep {
  pub name: String,
  /// Key templates, tried in order.
  pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveCacheStep {
  pub name: String,
  pub key: String,
  pub paths: Vec<String>,
}

impl Job {
  /// Normalize a job definition, validating each of its steps.
  pub(crate) fn from_def(
    id: &str,
    def: &JobDef,
    requires: Vec<String>,
  ) -> Result<Self, ConfigError> {
    let shell: Vec<String> = def
      .shell
      .as_deref()
      .unwrap_or(DEFAULT_SHELL)
      .split_whitespace()
      .map(str::to_string)
      .collect();
    if shell.is_empty() {
      return Err(ConfigError::InvalidStep {
        job: id.to_string(),
        index: 0,
        message: "shell must not be empty".to_string(),
      });
    }

    let steps = def
      .steps
      .iter()
      .enumerate()
      .map(|(index, step)| Step::from_def(id, index, step))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self {
      id: id.to_string(),
      image: def.image.clone(),
      resource_class: def.resource_class.clone(),
      working_directory: def.working_directory.as_ref().map(PathBuf::from),
      environment: def.environment.clone(),
      shell,
      steps,
      requires,
    })
  }
}

impl Step {
  fn from_def(job: &str, index: usize, def: &StepDef) -> Result<Self, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidStep {
      job: job.to_string(),
      index,
      message,
    };

    match def.kind_count() {
      1 => {}
      0 => return Err(invalid("step has no kind (expected run, restore_cache or save_cache)".into())),
      _ => return Err(invalid("step sets more than one kind".into())),
    }

    if let Some(run) = &def.run {
      let spec = run.clone().into_spec();
      if spec.command.trim().is_empty() {
        return Err(invalid("run command is empty".into()));
      }
      let no_output_timeout = spec
        .no_output_timeout
        .as_ref()
        .map(|value| value.to_duration())
        .transpose()
        .map_err(|e| invalid(e.to_string()))?;
      if no_output_timeout == Some(Duration::ZERO) {
        return Err(invalid("no_output_timeout must be greater than zero".into()));
      }
      return Ok(Step::Run(RunStep {
        name: spec.name.unwrap_or_else(|| spec.command.clone()),
        command: spec.command,
        no_output_timeout,
        pruning: spec.prune_output.unwrap_or_default(),
        environment: spec.environment,
      }));
    }

    if let Some(restore) = &def.restore_cache {
      let keys = restore.all_keys();
      if keys.is_empty() {
        return Err(invalid("restore_cache needs at least one key".into()));
      }
      return Ok(Step::RestoreCache(RestoreCacheStep {
        name: restore
          .name
          .clone()
          .unwrap_or_else(|| "Restoring cache".to_string()),
        keys,
      }));
    }

    let save = def
      .save_cache
      .as_ref()
      .ok_or_else(|| invalid("step has no kind".into()))?;
    if save.key.trim().is_empty() {
      return Err(invalid("save_cache key is empty".into()));
    }
    if save.paths.is_empty() {
      return Err(invalid("save_cache needs at least one path".into()));
    }
    Ok(Step::SaveCache(SaveCacheStep {
      name: save
        .name
        .clone()
        .unwrap_or_else(|| "Saving cache".to_string()),
      key: save.key.clone(),
      paths: save.paths.clone(),
    }))
  }
}
