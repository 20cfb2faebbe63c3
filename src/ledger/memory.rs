// src/ledger/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use tracing::debug;

use super::{LedgerRecord, RunLedger};
use crate::dag::InstanceId;

/// Keeps records in memory only; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<InstanceId, LedgerRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceId, LedgerRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl RunLedger for MemoryLedger {
    fn record(&self, record: LedgerRecord) -> Result<()> {
        debug!(instance = %record.instance, success = record.success, "recorded outcome (memory)");
        self.lock().insert(record.instance.clone(), record);
        Ok(())
    }

    fn status(&self, instance: &str) -> Result<Option<LedgerRecord>> {
        Ok(self.lock().get(instance).cloned())
    }
}
