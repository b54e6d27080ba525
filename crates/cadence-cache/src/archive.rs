use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::warn;

use crate::error::CacheError;

fn archive_error(context: &str) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
  move |e| CacheError::Archive {
    message: format!("{context}: {e}"),
  }
}

/// Resolve a cache path to a name relative to `root`.
///
/// Absolute paths are only accepted when they live under `root`, since
/// archive entries are always restored relative to the working directory.
fn relative_name(root: &Path, path: &str) -> Result<PathBuf, CacheError> {
  let raw = Path::new(path);
  let relative = if raw.is_absolute() {
    raw
      .strip_prefix(root)
      .map_err(|_| CacheError::Archive {
        message: format!("path '{path}' is outside the working directory"),
      })?
      .to_path_buf()
  } else {
    raw.to_path_buf()
  };

  if relative.components().any(|c| matches!(c, Component::ParentDir)) {
    return Err(CacheError::Archive {
      message: format!("path '{path}' escapes the working directory"),
    });
  }
  Ok(relative)
}

/// Pack the given paths (files or directories, relative to `root`) into a
/// gzip-compressed tar archive.
///
/// Paths that do not exist are skipped with a warning. Fails if none of them
/// exist, since an empty archive would shadow a later useful save.
pub fn pack_paths(root: &Path, paths: &[String]) -> Result<Bytes, CacheError> {
  let encoder = GzEncoder::new(Vec::new(), Compression::default());
  let mut builder = tar::Builder::new(encoder);
  builder.follow_symlinks(false);

  let mut packed = 0usize;
  for path in paths {
    let name = relative_name(root, path)?;
    let source = root.join(&name);

    if source.is_dir() {
      let entry_name = if name.as_os_str().is_empty() || name == Path::new(".") {
        PathBuf::from(".")
      } else {
        name.clone()
      };
      builder
        .append_dir_all(&entry_name, &source)
        .map_err(archive_error(path))?;
    } else if source.is_file() {
      builder
        .append_path_with_name(&source, &name)
        .map_err(archive_error(path))?;
    } else {
      warn!(path = %source.display(), "cache_path_missing");
      continue;
    }
    packed += 1;
  }

  if packed == 0 {
    return Err(CacheError::Archive {
      message: "none of the cache paths exist".to_string(),
    });
  }

  let encoder = builder.into_inner().map_err(archive_error("tar finalize"))?;
  let data = encoder.finish().map_err(archive_error("gzip finish"))?;
  Ok(Bytes::from(data))
}

/// Unpack an archive produced by [`pack_paths`] into `root`.
pub fn unpack(root: &Path, archive: &[u8]) -> Result<(), CacheError> {
  std::fs::create_dir_all(root).map_err(archive_error("create working directory"))?;
  let mut tar = tar::Archive::new(GzDecoder::new(archive));
  tar.set_preserve_mtime(true);
  tar.unpack(root).map_err(archive_error("unpack"))
}
