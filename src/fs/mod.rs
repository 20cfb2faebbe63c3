// src/fs/mod.rs

//! Filesystem abstraction used by the resolver, the staleness checker and
//! the executors.
//!
//! Paths handed to a [`FileSystem`] are usually relative to the pipeline
//! root; [`RealFileSystem`] resolves them against its root directory while
//! [`mock::MockFileSystem`] keeps an in-memory tree with a logical clock for
//! modification times.

use std::fmt::Debug;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    /// Directory that relative paths are resolved against.
    fn root(&self) -> &Path;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Modification time, or `None` if the path does not exist.
    fn modified(&self, path: &Path) -> Result<Option<SystemTime>>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Return a list of entries in a directory.
    /// Returned paths are `path` joined with each entry name.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Drop `.` components so that `./a/b.txt` and `a/b.txt` compare equal.
///
/// An empty result is returned as `.`.
pub fn normalize(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// Implementation that uses `std::fs`, rooted at the pipeline directory.
#[derive(Debug, Clone)]
pub struct RealFileSystem {
    root: PathBuf,
}

impl RealFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn abs(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSystem for RealFileSystem {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(self.abs(path)).with_context(|| format!("reading file {:?}", path))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(self.abs(path))
            .with_context(|| format!("opening file {:?}", path))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let path = self.abs(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file =
            fs::File::create(&path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents)
            .with_context(|| format!("writing to file {:?}", path))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.abs(path).exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.abs(path).is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.abs(path).is_dir()
    }

    fn modified(&self, path: &Path) -> Result<Option<SystemTime>> {
        match fs::metadata(self.abs(path)) {
            Ok(meta) => Ok(Some(
                meta.modified()
                    .with_context(|| format!("reading mtime of {:?}", path))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.abs(from), self.abs(to))
            .with_context(|| format!("renaming {:?} to {:?}", from, to))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.abs(path)).with_context(|| format!("removing {:?}", path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(self.abs(path)).with_context(|| format!("creating dir {:?}", path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.abs(path)).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(normalize(&path.join(entry.file_name())));
        }
        Ok(entries)
    }
}
