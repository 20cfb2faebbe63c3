// src/staleness.rs

//! Decides whether an instance must run.
//!
//! Timestamps are authoritative for instances with outputs: an instance is
//! fresh when every output exists and none is older than any input or any
//! upstream output. Grouping targets without work are always up to date.
//! The ledger adds what timestamps cannot see: previous
//! failures, changed commands, and upstream rebuilds within one run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::dag::{InstanceId, TaskInstance};
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::ledger::RunLedger;
use crate::task::{Task, WorkUnit};

/// Why an instance is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The instance declares no outputs and has no recorded success.
    NoOutputs,
    MissingOutput(PathBuf),
    MissingInput(PathBuf),
    OlderThanInput { output: PathBuf, input: PathBuf },
    OlderThanUpstream { output: PathBuf, upstream: PathBuf },
    /// An upstream instance with outputs ran in this invocation.
    UpstreamRebuilt(InstanceId),
    /// The command, inputs or outputs differ from the last success.
    FingerprintChanged,
    /// The last recorded attempt failed.
    PreviouslyFailed,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::NoOutputs => f.write_str("no outputs"),
            StaleReason::MissingOutput(p) => write!(f, "missing output {}", p.display()),
            StaleReason::MissingInput(p) => write!(f, "missing input {}", p.display()),
            StaleReason::OlderThanInput { output, input } => {
                write!(f, "{} older than input {}", output.display(), input.display())
            }
            StaleReason::OlderThanUpstream { output, upstream } => write!(
                f,
                "{} older than upstream output {}",
                output.display(),
                upstream.display()
            ),
            StaleReason::UpstreamRebuilt(id) => write!(f, "upstream {id} rebuilt"),
            StaleReason::FingerprintChanged => f.write_str("work unit changed"),
            StaleReason::PreviouslyFailed => f.write_str("previously failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    UpToDate,
    Stale(StaleReason),
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Staleness::Stale(_))
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::UpToDate => f.write_str("up to date"),
            Staleness::Stale(reason) => write!(f, "stale ({reason})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StalenessChecker {
    fs: Arc<dyn FileSystem>,
}

impl StalenessChecker {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn mtime(&self, path: &Path) -> Result<Option<SystemTime>> {
        Ok(self.fs.modified(path)?)
    }

    /// Filesystem rule only.
    ///
    /// Comparisons are strict: an output with the same timestamp as an
    /// input counts as fresh. Zero-byte outputs count as present.
    pub fn is_stale(&self, instance: &TaskInstance, upstream_outputs: &[&Path]) -> Result<Staleness> {
        if instance.outputs.is_empty() {
            return Ok(Staleness::Stale(StaleReason::NoOutputs));
        }

        let mut oldest: Option<(SystemTime, &PathBuf)> = None;
        for output in &instance.outputs {
            match self.mtime(output)? {
                None => return Ok(Staleness::Stale(StaleReason::MissingOutput(output.clone()))),
                Some(t) => {
                    if oldest.is_none_or(|(o, _)| t < o) {
                        oldest = Some((t, output));
                    }
                }
            }
        }
        let Some((oldest_time, oldest_output)) = oldest else {
            return Ok(Staleness::Stale(StaleReason::NoOutputs));
        };

        for input in &instance.inputs {
            match self.mtime(input)? {
                None => return Ok(Staleness::Stale(StaleReason::MissingInput(input.clone()))),
                Some(t) if t > oldest_time => {
                    return Ok(Staleness::Stale(StaleReason::OlderThanInput {
                        output: oldest_output.clone(),
                        input: input.clone(),
                    }));
                }
                Some(_) => {}
            }
        }

        for upstream in upstream_outputs {
            if let Some(t) = self.mtime(upstream)? {
                if t > oldest_time {
                    return Ok(Staleness::Stale(StaleReason::OlderThanUpstream {
                        output: oldest_output.clone(),
                        upstream: upstream.to_path_buf(),
                    }));
                }
            }
        }

        Ok(Staleness::UpToDate)
    }

    /// Full decision used by the scheduler: the filesystem rule plus the
    /// ledger record and in-run upstream rebuilds.
    pub fn evaluate(
        &self,
        instance: &TaskInstance,
        task: &Task,
        upstream_outputs: &[&Path],
        ledger: &dyn RunLedger,
        rebuilt_upstream: Option<&str>,
    ) -> Result<Staleness> {
        let record = ledger.status(&instance.id)?;

        if record.as_ref().is_some_and(|r| !r.success) {
            return Ok(Staleness::Stale(StaleReason::PreviouslyFailed));
        }
        if let Some(up) = rebuilt_upstream {
            return Ok(Staleness::Stale(StaleReason::UpstreamRebuilt(up.to_string())));
        }

        let fingerprint_matches = record
            .as_ref()
            .is_none_or(|r| r.fingerprint == instance.fingerprint);

        let verdict = match self.is_stale(instance, upstream_outputs)? {
            Staleness::Stale(StaleReason::NoOutputs) => {
                let recorded = record.as_ref().is_some_and(|r| r.success);
                let nothing_to_do = matches!(task.work, WorkUnit::Noop) && instance.mkdirs.is_empty();
                if nothing_to_do || (task.idempotent && recorded && fingerprint_matches) {
                    Staleness::UpToDate
                } else {
                    Staleness::Stale(StaleReason::NoOutputs)
                }
            }
            stale @ Staleness::Stale(_) => stale,
            Staleness::UpToDate if !fingerprint_matches => {
                Staleness::Stale(StaleReason::FingerprintChanged)
            }
            Staleness::UpToDate => Staleness::UpToDate,
        };

        debug!(instance = %instance.id, verdict = %verdict, "evaluated staleness");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{InputEntry, OneOrMany, TaskConfig};
    use crate::config::Params;
    use crate::fs::mock::MockFileSystem;
    use crate::ledger::{MemoryLedger, RunLedger};
    use crate::pattern::Captures;

    fn task(outputs: bool, idempotent: bool) -> Task {
        let cfg = TaskConfig {
            kind: Some(if outputs {
                crate::task::TaskKind::Transform
            } else {
                crate::task::TaskKind::Merge
            }),
            input: OneOrMany::One(InputEntry::Pattern("*.fq".into())),
            output: if outputs {
                OneOrMany::One("{basename}.bam".into())
            } else {
                OneOrMany::default()
            },
            cmd: Some("align {input}".into()),
            idempotent,
            ..TaskConfig::default()
        };
        Task::from_config("align", &cfg).unwrap()
    }

    fn instance(task: &Task, outputs: &[&str]) -> TaskInstance {
        TaskInstance::new(
            task,
            vec![PathBuf::from("s1.fq")],
            outputs.iter().map(PathBuf::from).collect(),
            Captures::new(),
            Vec::new(),
            &Params::new(),
        )
        .unwrap()
    }

    fn checker(fs: &MockFileSystem) -> StalenessChecker {
        StalenessChecker::new(Arc::new(fs.clone()))
    }

    #[test]
    fn fresh_outputs_are_up_to_date() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fq", "ACGT");
        fs.add_file("s1.bam", "");
        let t = task(true, false);
        let inst = instance(&t, &["s1.bam"]);
        assert_eq!(checker(&fs).is_stale(&inst, &[]).unwrap(), Staleness::UpToDate);
    }

    #[test]
    fn missing_or_older_outputs_are_stale() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fq", "ACGT");
        let t = task(true, false);
        let inst = instance(&t, &["s1.bam"]);
        let c = checker(&fs);

        assert_eq!(
            c.is_stale(&inst, &[]).unwrap(),
            Staleness::Stale(StaleReason::MissingOutput(PathBuf::from("s1.bam")))
        );

        fs.add_file("s1.bam", "x");
        fs.touch("s1.fq");
        assert!(matches!(
            c.is_stale(&inst, &[]).unwrap(),
            Staleness::Stale(StaleReason::OlderThanInput { .. })
        ));

        fs.touch("s1.bam");
        fs.add_file("ref.fa", ">chr1");
        assert!(matches!(
            c.is_stale(&inst, &[Path::new("ref.fa")]).unwrap(),
            Staleness::Stale(StaleReason::OlderThanUpstream { .. })
        ));
    }

    #[test]
    fn ledger_failures_and_fingerprints_force_reruns() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fq", "ACGT");
        fs.add_file("s1.bam", "");
        let t = task(true, false);
        let inst = instance(&t, &["s1.bam"]);
        let ledger = MemoryLedger::new();
        let c = checker(&fs);

        assert_eq!(c.evaluate(&inst, &t, &[], &ledger, None).unwrap(), Staleness::UpToDate);

        ledger.mark_failed(&inst).unwrap();
        assert_eq!(
            c.evaluate(&inst, &t, &[], &ledger, None).unwrap(),
            Staleness::Stale(StaleReason::PreviouslyFailed)
        );

        let mut changed = inst.clone();
        changed.fingerprint = "different".into();
        ledger.mark_success(&changed).unwrap();
        assert_eq!(
            c.evaluate(&inst, &t, &[], &ledger, None).unwrap(),
            Staleness::Stale(StaleReason::FingerprintChanged)
        );

        assert_eq!(
            c.evaluate(&inst, &t, &[], &ledger, Some("trim[s1.fq]")).unwrap(),
            Staleness::Stale(StaleReason::UpstreamRebuilt("trim[s1.fq]".into()))
        );
    }

    #[test]
    fn output_less_instances_need_idempotent_success() {
        let fs = MockFileSystem::new();
        fs.add_file("s1.fq", "ACGT");
        let ledger = MemoryLedger::new();

        let plain = task(false, false);
        let inst = instance(&plain, &[]);
        ledger.mark_success(&inst).unwrap();
        assert_eq!(
            checker(&fs).evaluate(&inst, &plain, &[], &ledger, None).unwrap(),
            Staleness::Stale(StaleReason::NoOutputs)
        );

        let idem = task(false, true);
        let inst = instance(&idem, &[]);
        ledger.mark_success(&inst).unwrap();
        assert_eq!(
            checker(&fs).evaluate(&inst, &idem, &[], &ledger, None).unwrap(),
            Staleness::UpToDate
        );
    }
}
