// src/exec/staging.rs

//! Temporary output paths, renamed into place only on success.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::fs::FileSystem;

/// Suffix of staged output names: `<dir>/.<name>.pipedag-tmp`.
pub const STAGING_SUFFIX: &str = ".pipedag-tmp";

pub fn staged_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staged = format!(".{name}{STAGING_SUFFIX}");
    match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(staged),
        _ => PathBuf::from(staged),
    }
}

/// Output staging for one instance.
#[derive(Debug, Clone)]
pub struct Staging {
    /// `(write path, final path)`; equal when staging is disabled.
    pairs: Vec<(PathBuf, PathBuf)>,
    enabled: bool,
}

impl Staging {
    pub fn new(outputs: &[PathBuf], enabled: bool) -> Self {
        let pairs = outputs
            .iter()
            .map(|out| {
                let write = if enabled { staged_path(out) } else { out.clone() };
                (write, out.clone())
            })
            .collect();
        Self { pairs, enabled }
    }

    /// Paths the work unit writes to.
    pub fn write_paths(&self) -> Vec<PathBuf> {
        self.pairs.iter().map(|(w, _)| w.clone()).collect()
    }

    /// Create output directories and clear leftovers of an earlier attempt.
    pub fn prepare(&self, fs: &dyn FileSystem) -> Result<()> {
        for (write, _) in &self.pairs {
            if let Some(dir) = write.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs.create_dir_all(dir)?;
            }
            if self.enabled && fs.is_file(write) {
                fs.remove_file(write)?;
            }
        }
        Ok(())
    }

    /// Move staged files into place and return the outputs that were not
    /// produced.
    ///
    /// With staging on, a missing staged file means the work unit did not
    /// write that output; nothing is renamed and the staged files are
    /// removed, so older files at the final paths are left as they were.
    pub fn commit(&self, fs: &dyn FileSystem) -> Result<Vec<PathBuf>> {
        if !self.enabled {
            return Ok(self
                .pairs
                .iter()
                .filter(|(_, fin)| !fs.exists(fin))
                .map(|(_, fin)| fin.clone())
                .collect());
        }

        let missing: Vec<PathBuf> = self
            .pairs
            .iter()
            .filter(|(staged, _)| !fs.is_file(staged))
            .map(|(_, fin)| fin.clone())
            .collect();
        if !missing.is_empty() {
            self.discard(fs);
            return Ok(missing);
        }

        for (staged, fin) in &self.pairs {
            fs.rename(staged, fin)?;
            debug!(output = %fin.display(), "committed staged output");
        }
        Ok(Vec::new())
    }

    /// Remove staged files after a failure. Final paths are never touched.
    pub fn discard(&self, fs: &dyn FileSystem) {
        if !self.enabled {
            return;
        }
        for (staged, _) in &self.pairs {
            if fs.is_file(staged) {
                if let Err(err) = fs.remove_file(staged) {
                    warn!(path = %staged.display(), error = %err, "failed to remove staged output");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn staged_paths_are_hidden_siblings() {
        assert_eq!(
            staged_path(Path::new("peaks.dir/s1.narrowPeak")),
            PathBuf::from("peaks.dir/.s1.narrowPeak.pipedag-tmp")
        );
        assert_eq!(staged_path(Path::new("s1.bam")), PathBuf::from(".s1.bam.pipedag-tmp"));
    }

    #[test]
    fn commit_renames_every_staged_output() {
        let fs = MockFileSystem::new();
        let outputs = vec![PathBuf::from("out/a.txt"), PathBuf::from("out/b.txt")];
        let staging = Staging::new(&outputs, true);
        staging.prepare(&fs).unwrap();

        fs.add_file("out/.a.txt.pipedag-tmp", "a");
        fs.add_file("out/.b.txt.pipedag-tmp", "b");
        let missing = staging.commit(&fs).unwrap();

        assert!(missing.is_empty());
        assert_eq!(fs.read_to_string(Path::new("out/a.txt")).unwrap(), "a");
        assert_eq!(fs.read_to_string(Path::new("out/b.txt")).unwrap(), "b");
        assert!(!fs.exists(Path::new("out/.b.txt.pipedag-tmp")));
    }

    #[test]
    fn unwritten_output_is_missing_even_if_an_old_file_exists() {
        let fs = MockFileSystem::new();
        fs.add_file("out/a.txt", "a from last run");
        fs.add_file("out/b.txt", "b from last run");
        let outputs = vec![PathBuf::from("out/a.txt"), PathBuf::from("out/b.txt")];
        let staging = Staging::new(&outputs, true);
        staging.prepare(&fs).unwrap();

        fs.add_file("out/.a.txt.pipedag-tmp", "a");
        let missing = staging.commit(&fs).unwrap();

        assert_eq!(missing, vec![PathBuf::from("out/b.txt")]);
        // Nothing was moved into place, and the staged file is gone.
        assert_eq!(fs.read_to_string(Path::new("out/a.txt")).unwrap(), "a from last run");
        assert_eq!(fs.read_to_string(Path::new("out/b.txt")).unwrap(), "b from last run");
        assert!(!fs.exists(Path::new("out/.a.txt.pipedag-tmp")));
    }

    #[test]
    fn unstaged_commit_checks_final_paths() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.bam", "bam");
        let staging = Staging::new(&[PathBuf::from("s1.bam"), PathBuf::from("s1.bai")], false);

        assert_eq!(staging.commit(&fs).unwrap(), vec![PathBuf::from("s1.bai")]);
    }

    #[test]
    fn discard_leaves_final_paths_alone() {
        let fs = MockFileSystem::new();
        fs.add_file("a.txt", "previous");
        let staging = Staging::new(&[PathBuf::from("a.txt")], true);
        fs.add_file(".a.txt.pipedag-tmp", "partial");

        staging.discard(&fs);

        assert!(!fs.exists(Path::new(".a.txt.pipedag-tmp")));
        assert_eq!(fs.read_to_string(Path::new("a.txt")).unwrap(), "previous");
    }
}
