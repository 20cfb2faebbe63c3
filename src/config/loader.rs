// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PipelineFile, RawPipelineFile};
use crate::errors::Result;

/// Load a pipeline file from a given path and return the raw model.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

/// Parse a pipeline file from TOML text.
pub fn load_from_str(contents: &str) -> Result<RawPipelineFile> {
    let raw: RawPipelineFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a pipeline file from path and validate it.
///
/// - Reads TOML (task declaration order is preserved).
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown `after` / task references,
///   - cycles among explicit dependencies,
///   - malformed globs, regexes, templates and activation expressions,
///   - task kinds that do not fit their inputs and outputs.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineFile> {
    let raw = load_from_path(&path)?;
    PipelineFile::try_from(raw)
}

/// Default pipeline file in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipeline.toml")
}

/// Directory relative paths in the pipeline file are resolved against.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
