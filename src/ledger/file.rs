// src/ledger/file.rs

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{LedgerRecord, RunLedger};
use crate::dag::InstanceId;

/// Default ledger location relative to the pipeline root.
pub const LEDGER_FILE_PATH: &str = ".pipedag/ledger.jsonl";

/// Append-only JSON-lines ledger.
///
/// Each completion appends one line; on open the log is replayed so the
/// last line per instance wins. A torn final write is truncated on open;
/// other malformed lines are skipped with a warning.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    index: Mutex<HashMap<InstanceId, LedgerRecord>>,
}

impl FileLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        truncate_torn_tail(&path)?;
        let index = load_records(&path)?;
        debug!(path = %path.display(), records = index.len(), "opened ledger");
        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceId, LedgerRecord>> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RunLedger for FileLedger {
    fn record(&self, record: LedgerRecord) -> Result<()> {
        let line = serde_json::to_string(&record).context("serializing ledger record")?;

        let mut index = self.lock();
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating ledger directory {:?}", dir))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening ledger at {:?}", self.path))?;
        writeln!(file, "{line}")?;
        file.flush()?;

        debug!(instance = %record.instance, success = record.success, "recorded outcome (file)");
        index.insert(record.instance.clone(), record);
        Ok(())
    }

    fn status(&self, instance: &str) -> Result<Option<LedgerRecord>> {
        Ok(self.lock().get(instance).cloned())
    }

    fn compact(&self) -> Result<()> {
        let index = self.lock();
        let mut records: Vec<&LedgerRecord> = index.values().collect();
        records.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.instance.cmp(&b.instance))
        });

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let file = File::create(&tmp)
                .with_context(|| format!("creating compacted ledger at {:?}", tmp))?;
            let mut writer = BufWriter::new(file);
            for record in &records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing ledger at {:?}", self.path))?;

        info!(records = records.len(), "compacted ledger");
        Ok(())
    }
}

/// Cut an unterminated final line left by an interrupted append, so the
/// next record starts on a line of its own.
fn truncate_torn_tail(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bytes = fs::read(path).with_context(|| format!("reading ledger at {:?}", path))?;
    if bytes.last().is_none_or(|&b| b == b'\n') {
        return Ok(());
    }
    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    warn!(
        path = %path.display(),
        dropped = bytes.len() - keep,
        "truncating torn final ledger line"
    );
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(keep as u64))
        .with_context(|| format!("truncating ledger at {:?}", path))
}

fn load_records(path: &Path) -> Result<HashMap<InstanceId, LedgerRecord>> {
    let mut map = HashMap::new();
    if !path.exists() {
        return Ok(map);
    }

    let file = File::open(path).with_context(|| format!("opening ledger at {:?}", path))?;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerRecord>(trimmed) {
            Ok(record) => {
                map.insert(record.instance.clone(), record);
            }
            Err(err) => {
                warn!(line = lineno + 1, error = %err, "skipping malformed ledger line");
            }
        }
    }
    Ok(map)
}
