// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod design;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod ledger;
pub mod logging;
pub mod pattern;
pub mod staleness;
pub mod task;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{PipelineFile, Params, config_root_dir, default_skeleton, load_and_validate};
use crate::dag::{GraphResolver, Plan, TaskRegistry};
use crate::design::DesignTable;
use crate::engine::{CoreRuntime, EVENT_CHANNEL_CAPACITY, RunReport, Runtime, RuntimeEvent};
use crate::errors::{PipedagError, Result};
use crate::exec::{ClusterBackend, ExecutorBackend, LocalBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::ledger::{RunLedger, open_ledger};
use crate::staleness::{StaleReason, Staleness, StalenessChecker};
use crate::types::{BackendKind, LedgerStorage};

/// A loaded pipeline: validated file, task registry, params and design
/// table, bound to a filesystem rooted at the pipeline directory.
#[derive(Debug)]
pub struct Pipeline {
    pub file: PipelineFile,
    pub registry: TaskRegistry,
    pub params: Params,
    pub design: Option<DesignTable>,
    pub fs: Arc<dyn FileSystem>,
}

impl Pipeline {
    /// Load `path`, apply `--param` overrides and root the filesystem at the
    /// pipeline file's directory.
    pub fn load(path: &Path, overrides: &[String]) -> Result<Self> {
        let file = load_and_validate(path)?;
        let root = config_root_dir(path).canonicalize()?;
        Self::from_file(file, Arc::new(RealFileSystem::new(root)), overrides)
    }

    pub fn from_file(file: PipelineFile, fs: Arc<dyn FileSystem>, overrides: &[String]) -> Result<Self> {
        let mut params = Params::from_table(&file.params)?;
        for spec in overrides {
            params.apply_override(spec)?;
        }

        let design = match &file.design {
            Some(section) => {
                DesignTable::load(fs.as_ref(), Path::new(&section.path), &section.key_column)?
            }
            None => None,
        };
        let registry = TaskRegistry::from_config(&file)?;

        Ok(Self {
            file,
            registry,
            params,
            design,
            fs,
        })
    }

    /// Requested targets, else `default_target`, else every task.
    pub fn targets(&self, requested: &[String]) -> Vec<String> {
        if !requested.is_empty() {
            return requested.to_vec();
        }
        match &self.file.pipeline.default_target {
            Some(t) => vec![t.clone()],
            None => self.registry.tasks().map(|t| t.name.clone()).collect(),
        }
    }

    pub fn plan(&self, requested: &[String]) -> Result<Plan> {
        let targets = self.targets(requested);
        GraphResolver::new(&self.registry, self.fs.as_ref())
            .with_design(self.design.as_ref())
            .plan(&targets, &self.params)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.fs.root().join(&self.file.pipeline.ledger_path)
    }
}

/// Run options resolved from the pipeline file and CLI overrides.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub backend: BackendKind,
    pub ledger: LedgerStorage,
}

/// Execute a plan with one of the built-in backends.
pub async fn execute(pipeline: &Pipeline, plan: Plan, opts: &RunOptions) -> Result<RunReport> {
    let ledger = open_ledger(opts.ledger, &pipeline.ledger_path())?;
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let fs = Arc::clone(&pipeline.fs);

    match opts.backend {
        BackendKind::Local => {
            let backend = LocalBackend::new(Arc::clone(&fs), opts.concurrency, tx);
            execute_with(plan, fs, ledger, opts.concurrency, rx, backend).await
        }
        BackendKind::Cluster => {
            let section = pipeline.file.cluster.as_ref().ok_or_else(|| {
                PipedagError::ConfigError("backend 'cluster' requires a [cluster] section".into())
            })?;
            let backend = ClusterBackend::from_config(Arc::clone(&fs), section, opts.concurrency, tx);
            execute_with(plan, fs, ledger, opts.concurrency, rx, backend).await
        }
    }
}

/// Execute a plan with any backend; the backend must report completions on
/// the sender paired with `rx`.
pub async fn execute_with<E: ExecutorBackend>(
    plan: Plan,
    fs: Arc<dyn FileSystem>,
    ledger: Arc<dyn RunLedger>,
    concurrency: usize,
    rx: mpsc::Receiver<RuntimeEvent>,
    backend: E,
) -> Result<RunReport> {
    let core = CoreRuntime::new(Arc::new(plan), fs, ledger, concurrency);
    Runtime::new(core, rx, backend).run().await
}

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let path = PathBuf::from(&args.pipeline);

    match &args.command {
        Command::Config => {
            print!("{}", default_skeleton());
            Ok(errors::EXIT_OK)
        }
        Command::ShowPlan { targets } => {
            let pipeline = Pipeline::load(&path, &args.params)?;
            let plan = pipeline.plan(targets)?;
            print!("{}", render_plan(&pipeline, &plan)?);
            Ok(errors::EXIT_OK)
        }
        Command::Run {
            targets,
            concurrency,
            backend,
            ledger,
        } => {
            let pipeline = Pipeline::load(&path, &args.params)?;
            let plan = pipeline.plan(targets)?;
            let section = &pipeline.file.pipeline;
            let opts = RunOptions {
                concurrency: concurrency.unwrap_or(section.concurrency).max(1),
                backend: backend.unwrap_or(section.backend),
                ledger: ledger.unwrap_or(section.ledger),
            };
            info!(
                instances = plan.len(),
                concurrency = opts.concurrency,
                backend = ?opts.backend,
                "starting run"
            );

            let report = execute(&pipeline, plan, &opts).await?;
            print!("{report}");
            if report.aborted {
                return Ok(errors::EXIT_ABORTED);
            }
            report.into_result()?;
            Ok(errors::EXIT_OK)
        }
    }
}

/// Text for `show-plan`: the execution order with each instance's
/// staleness, then the pruned tasks.
///
/// Staleness is propagated statically: anything downstream of a stale
/// instance with outputs is reported as stale too.
pub fn render_plan(pipeline: &Pipeline, plan: &Plan) -> Result<String> {
    use std::fmt::Write as _;

    let ledger: Arc<dyn RunLedger> = match pipeline.file.pipeline.ledger {
        LedgerStorage::File if pipeline.ledger_path().is_file() => {
            open_ledger(LedgerStorage::File, &pipeline.ledger_path())?
        }
        _ => open_ledger(LedgerStorage::Memory, &pipeline.ledger_path())?,
    };
    let checker = StalenessChecker::new(Arc::clone(&pipeline.fs));

    let mut out = String::new();
    let targets = plan.targets().join(", ");
    let _ = writeln!(out, "plan for {targets}: {} instance(s)", plan.len());

    let mut stale = vec![false; plan.len()];
    for (idx, instance) in plan.instances().iter().enumerate() {
        let Some(task) = plan.task_of(idx) else {
            continue;
        };
        let rebuilt = plan
            .graph()
            .dependencies_of(idx)
            .iter()
            .copied()
            .find(|&dep| stale[dep] && plan.instance(dep).is_some_and(|i| !i.outputs.is_empty()))
            .and_then(|dep| plan.instance(dep))
            .map(|i| i.id.clone());

        let upstream = plan.upstream_outputs(idx);
        let verdict = match checker.evaluate(instance, task, &upstream, ledger.as_ref(), rebuilt.as_deref()) {
            Ok(v) => v,
            Err(err) => {
                warn!(instance = %instance.id, error = %err, "staleness check failed");
                Staleness::Stale(StaleReason::NoOutputs)
            }
        };
        stale[idx] = verdict.is_stale();
        let _ = writeln!(out, "{:>4}. {}  {}", idx + 1, instance.id, verdict);
    }

    if !plan.pruned().is_empty() {
        let _ = writeln!(out, "pruned (inactive): {}", plan.pruned().join(", "));
    }
    debug!("plan rendered");
    Ok(out)
}
