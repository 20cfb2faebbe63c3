// src/fs/mock.rs

use super::{normalize, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub enum MockEntry {
    /// File contents plus a logical modification time.
    File { content: Vec<u8>, mtime: u64 },
    Dir(Vec<String>), // List of child names
}

#[derive(Debug, Default)]
struct MockState {
    entries: HashMap<PathBuf, MockEntry>,
    /// Logical clock; every write or touch advances it by one tick.
    clock: u64,
}

/// In-memory filesystem with deterministic modification times.
///
/// Every write bumps a logical clock, so a file written later is always
/// strictly newer than one written earlier. Timestamps are exposed as
/// `UNIX_EPOCH + clock` seconds.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    root: PathBuf,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut state = MockState::default();
        // Ensure root exists
        state
            .entries
            .insert(PathBuf::from("."), MockEntry::Dir(Vec::new()));

        Self {
            root: PathBuf::from("."),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = normalize(path.as_ref());
        let mut state = self.lock();
        state.clock += 1;
        let mtime = state.clock;
        state.entries.insert(
            path.clone(),
            MockEntry::File {
                content: content.into(),
                mtime,
            },
        );
        link_into_parent(&mut state.entries, &path);
    }

    /// Advance the clock and stamp `path` with it, creating an empty file if
    /// it does not exist yet.
    pub fn touch(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        let existing = {
            let mut state = self.lock();
            state.clock += 1;
            let now = state.clock;
            match state.entries.get_mut(&path) {
                Some(MockEntry::File { mtime, .. }) => {
                    *mtime = now;
                    true
                }
                _ => false,
            }
        };
        if !existing {
            self.add_file(&path, Vec::new());
        }
    }

    /// Logical modification time of a file.
    pub fn mtime(&self, path: impl AsRef<Path>) -> Option<u64> {
        let state = self.lock();
        match state.entries.get(&normalize(path.as_ref())) {
            Some(MockEntry::File { mtime, .. }) => Some(*mtime),
            _ => None,
        }
    }

    /// All file paths currently present, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let state = self.lock();
        let mut files: Vec<PathBuf> = state
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, MockEntry::File { .. }))
            .map(|(p, _)| p.clone())
            .collect();
        files.sort();
        files
    }
}

fn parent_of(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    if parent.as_os_str().is_empty() {
        Some(PathBuf::from("."))
    } else {
        Some(parent.to_path_buf())
    }
}

// Ensure parent directories exist implicitly and list `path` in its parent.
fn link_into_parent(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    let Some(parent) = parent_of(path) else {
        return;
    };
    if parent == path {
        return;
    }
    if !entries.contains_key(&parent) {
        entries.insert(parent.clone(), MockEntry::Dir(Vec::new()));
        link_into_parent(entries, &parent);
    }
    if let Some(MockEntry::Dir(children)) = entries.get_mut(&parent) {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }
}

fn unlink_from_parent(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    let Some(parent) = parent_of(path) else {
        return;
    };
    if let (Some(MockEntry::Dir(children)), Some(name)) = (
        entries.get_mut(&parent),
        path.file_name().and_then(|n| n.to_str()),
    ) {
        children.retain(|c| c != name);
    }
}

impl FileSystem for MockFileSystem {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.lock();
        match state.entries.get(&normalize(path)) {
            Some(MockEntry::File { content, .. }) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let state = self.lock();
        match state.entries.get(&normalize(path)) {
            Some(MockEntry::File { content, .. }) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().entries.contains_key(&normalize(path))
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(
            self.lock().entries.get(&normalize(path)),
            Some(MockEntry::File { .. })
        )
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(
            self.lock().entries.get(&normalize(path)),
            Some(MockEntry::Dir(_))
        )
    }

    fn modified(&self, path: &Path) -> Result<Option<SystemTime>> {
        Ok(self
            .mtime(path)
            .map(|tick| UNIX_EPOCH + Duration::from_secs(tick)))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = normalize(from);
        let to = normalize(to);
        let mut state = self.lock();
        let entry = state
            .entries
            .remove(&from)
            .ok_or_else(|| anyhow!("File not found: {:?}", from))?;
        unlink_from_parent(&mut state.entries, &from);
        state.entries.insert(to.clone(), entry);
        link_into_parent(&mut state.entries, &to);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        let mut state = self.lock();
        match state.entries.get(&path) {
            Some(MockEntry::File { .. }) => {
                state.entries.remove(&path);
                unlink_from_parent(&mut state.entries, &path);
                Ok(())
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        let mut state = self.lock();
        if !state.entries.contains_key(&path) {
            state.entries.insert(path.clone(), MockEntry::Dir(Vec::new()));
            link_into_parent(&mut state.entries, &path);
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let path = normalize(path);
        let state = self.lock();
        match state.entries.get(&path) {
            Some(MockEntry::Dir(children)) => Ok(children
                .iter()
                .map(|name| normalize(&path.join(name)))
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_advance_the_clock() {
        let fs = MockFileSystem::new();
        fs.add_file("raw.fastq", "ACGT");
        fs.add_file("trimmed.fastq", "ACG");

        assert!(fs.mtime("raw.fastq") < fs.mtime("trimmed.fastq"));

        fs.touch("raw.fastq");
        assert!(fs.mtime("raw.fastq") > fs.mtime("trimmed.fastq"));
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("out/.a.txt.pipedag-tmp", "x");
        fs.rename(Path::new("out/.a.txt.pipedag-tmp"), Path::new("out/a.txt"))
            .unwrap();

        assert!(fs.is_file(Path::new("out/a.txt")));
        assert!(!fs.exists(Path::new("out/.a.txt.pipedag-tmp")));
        assert_eq!(
            fs.read_dir(Path::new("out")).unwrap(),
            vec![PathBuf::from("out/a.txt")]
        );
    }

    #[test]
    fn nested_files_are_reachable_from_root() {
        let fs = MockFileSystem::new();
        fs.add_file("./homer/Tag.dir/s1/s1.txt", "");

        assert!(fs.is_dir(Path::new("homer/Tag.dir")));
        assert_eq!(
            fs.read_dir(Path::new(".")).unwrap(),
            vec![PathBuf::from("homer")]
        );
    }
}
