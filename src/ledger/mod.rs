// src/ledger/mod.rs

//! Durable record of instance outcomes across invocations.
//!
//! The runtime loop is the single writer. A rerun after a partial failure
//! consults the ledger to skip instances that already succeeded and are
//! still fresh.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{InstanceId, TaskInstance};
use crate::engine::TaskName;
use crate::types::LedgerStorage;

pub mod file;
pub mod memory;

pub use file::FileLedger;
pub use memory::MemoryLedger;

/// One completion, keyed by instance identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub instance: InstanceId,
    pub task: TaskName,
    pub success: bool,
    /// Work-unit fingerprint at completion time.
    pub fingerprint: String,
    pub completed_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn new(instance: &TaskInstance, success: bool) -> Self {
        Self {
            instance: instance.id.clone(),
            task: instance.task.clone(),
            success,
            fingerprint: instance.fingerprint.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// Abstract storage for instance outcomes. The last record per instance
/// wins.
pub trait RunLedger: Send + Sync + Debug {
    fn record(&self, record: LedgerRecord) -> Result<()>;

    /// Last record for an instance, if any.
    fn status(&self, instance: &str) -> Result<Option<LedgerRecord>>;

    /// Rewrite storage keeping only the last record per instance.
    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn mark_success(&self, instance: &TaskInstance) -> Result<()> {
        self.record(LedgerRecord::new(instance, true))
    }

    fn mark_failed(&self, instance: &TaskInstance) -> Result<()> {
        self.record(LedgerRecord::new(instance, false))
    }

    fn has_succeeded(&self, instance: &str) -> Result<bool> {
        Ok(self.status(instance)?.is_some_and(|r| r.success))
    }
}

/// Open the configured ledger. `path` is used by the file store only.
pub fn open_ledger(storage: LedgerStorage, path: &Path) -> Result<Arc<dyn RunLedger>> {
    Ok(match storage {
        LedgerStorage::File => Arc::new(FileLedger::open(path)?),
        LedgerStorage::Memory => Arc::new(MemoryLedger::new()),
    })
}
