use std::path::Path;

use crate::error::LoadError;
use crate::pipeline::PipelineDef;

/// On-disk format of a pipeline file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Yaml,
  Json,
}

impl Format {
  /// Pick the format from the file extension. Anything but `.json` is YAML.
  pub fn from_path(path: &Path) -> Self {
    match path.extension().and_then(|ext| ext.to_str()) {
      Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
      _ => Format::Yaml,
    }
  }
}

impl PipelineDef {
  /// Parse a pipeline definition from a string.
  pub fn parse(content: &str, format: Format) -> Result<Self, LoadError> {
    let def = match format {
      Format::Yaml => serde_yaml::from_str(content)?,
      Format::Json => serde_json::from_str(content)?,
    };
    Ok(def)
  }

  /// Read and parse a pipeline file.
  pub fn load(path: &Path) -> Result<Self, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content, Format::from_path(path))
  }
}
