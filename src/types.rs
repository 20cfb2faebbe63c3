use std::str::FromStr;
use serde::Deserialize;

/// Where ready task instances are executed.
///
/// - `Local`: a bounded pool of `sh -c` processes on this machine (default).
/// - `Cluster`: job scripts submitted to an external queue via the
///   `[cluster]` commands and polled until they finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Cluster,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Local
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "cluster" => Ok(BackendKind::Cluster),
            other => Err(format!(
                "invalid backend: {other} (expected \"local\" or \"cluster\")"
            )),
        }
    }
}

/// Mode for storing the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStorage {
    /// Append-only JSON lines file (`.pipedag/ledger.jsonl` by default).
    File,
    /// In memory only (lost on exit; every invocation starts fresh).
    Memory,
}

impl Default for LedgerStorage {
    fn default() -> Self {
        LedgerStorage::File
    }
}

impl FromStr for LedgerStorage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(LedgerStorage::File),
            "memory" => Ok(LedgerStorage::Memory),
            other => Err(format!(
                "invalid ledger storage: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}
