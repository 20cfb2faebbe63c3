// src/exec/task_runner.rs

//! Running a single instance: directories, output staging, the work unit
//! itself and the completion event sent back to the runtime.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledInstance;
use crate::engine::{FailureCause, RuntimeEvent, TaskOutcome};
use crate::exec::staging::Staging;
use crate::exec::work_unit::WorkContext;
use crate::fs::FileSystem;
use crate::task::WorkUnit;

/// Future returned by [`CommandRunner::run_command`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), FailureCause>> + Send + 'a>>;

/// Runs a rendered command line somewhere: a local shell or a cluster queue.
pub trait CommandRunner: Send + Sync + Debug {
    fn run_command<'a>(&'a self, sched: &'a ScheduledInstance, cmd: String) -> CommandFuture<'a>;
}

/// Run one instance to completion and report its outcome.
///
/// Staged outputs are committed only after the work unit succeeded; on any
/// failure they are removed and previously existing outputs stay untouched.
pub async fn run_instance(
    sched: &ScheduledInstance,
    fs: Arc<dyn FileSystem>,
    runner: &dyn CommandRunner,
) -> TaskOutcome {
    let instance = &sched.instance;

    for dir in &instance.mkdirs {
        if let Err(err) = fs.create_dir_all(dir) {
            return TaskOutcome::Failed(FailureCause::Spawn(format!(
                "creating {}: {err:#}",
                dir.display()
            )));
        }
    }

    let staging = Staging::new(&instance.outputs, sched.task.stage_outputs);
    if let Err(err) = staging.prepare(fs.as_ref()) {
        return TaskOutcome::Failed(FailureCause::Spawn(format!("preparing outputs: {err:#}")));
    }

    let result = match &sched.task.work {
        WorkUnit::Noop => Ok(()),
        WorkUnit::Function { label, func } => {
            info!(instance = %sched.id(), function = %label, "running function");
            let ctx = WorkContext {
                instance_id: instance.id.clone(),
                inputs: instance.inputs.clone(),
                outputs: staging.write_paths(),
                captures: instance.captures.clone(),
                params: Arc::clone(&sched.params),
                fs: Arc::clone(&fs),
            };
            let func = Arc::clone(func);
            match tokio::task::spawn_blocking(move || func(&ctx)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(FailureCause::Function(format!("{err:#}"))),
                Err(join) => Err(FailureCause::Function(format!("panicked: {join}"))),
            }
        }
        WorkUnit::Command(template) => {
            let mut staged = instance.clone();
            staged.outputs = staging.write_paths();
            match staged.render(template, &sched.params) {
                Ok(cmd) => runner.run_command(sched, cmd).await,
                Err(err) => Err(FailureCause::Spawn(err.to_string())),
            }
        }
    };

    match result {
        Ok(()) => match staging.commit(fs.as_ref()) {
            Ok(missing) if missing.is_empty() => TaskOutcome::Success,
            Ok(missing) => TaskOutcome::Failed(FailureCause::MissingOutputs(missing)),
            Err(err) => {
                staging.discard(fs.as_ref());
                TaskOutcome::Failed(FailureCause::Spawn(format!("committing outputs: {err:#}")))
            }
        },
        Err(cause) => {
            staging.discard(fs.as_ref());
            TaskOutcome::Failed(cause)
        }
    }
}

/// Shared dispatch machinery for the real backends: one tokio task per
/// instance, bounded by a semaphore.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn CommandRunner>,
    permits: Arc<Semaphore>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl Dispatcher {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        runner: Arc<dyn CommandRunner>,
        concurrency: usize,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            fs,
            runner,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            runtime_tx,
        }
    }

    pub fn dispatch(&self, sched: ScheduledInstance) {
        let fs = Arc::clone(&self.fs);
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        let tx = self.runtime_tx.clone();

        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    debug!(instance = %sched.id(), "starting instance");
                    run_instance(&sched, fs, runner.as_ref()).await
                }
                Err(err) => {
                    error!(instance = %sched.id(), error = %err, "executor semaphore closed");
                    TaskOutcome::Failed(FailureCause::Spawn(err.to_string()))
                }
            };

            match &outcome {
                TaskOutcome::Success => info!(instance = %sched.id(), "instance finished"),
                TaskOutcome::Failed(cause) => warn!(instance = %sched.id(), %cause, "instance failed"),
            }

            let event = RuntimeEvent::InstanceCompleted {
                index: sched.index,
                id: sched.instance.id.clone(),
                outcome,
            };
            if tx.send(event).await.is_err() {
                debug!(instance = %sched.id(), "runtime gone; dropping completion");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use crate::config::Params;
    use crate::dag::TaskInstance;
    use crate::fs::mock::MockFileSystem;
    use crate::pattern::{Captures, Template};
    use crate::task::{Task, TaskKind};
    use crate::config::TaskConfig;

    /// Records command lines and creates the files named after `-o`.
    #[derive(Debug, Default)]
    struct ScriptedRunner {
        fs: Option<MockFileSystem>,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    impl CommandRunner for ScriptedRunner {
        fn run_command<'a>(&'a self, _sched: &'a ScheduledInstance, cmd: String) -> CommandFuture<'a> {
            Box::pin(async move {
                if let (Some(fs), Some((_, out))) = (&self.fs, cmd.split_once("-o ")) {
                    fs.add_file(out.trim(), "data");
                }
                self.seen.lock().unwrap().push(cmd);
                if self.fail {
                    Err(FailureCause::ExitStatus { code: Some(1), stderr_tail: "boom".into() })
                } else {
                    Ok(())
                }
            })
        }
    }

    fn scheduled(stage: bool) -> ScheduledInstance {
        let cfg = TaskConfig {
            cmd: Some("trim {input} -o {output}".into()),
            stage_outputs: stage,
            ..TaskConfig::default()
        };
        let mut task = Task::from_config("trim", &cfg).unwrap();
        task.kind = TaskKind::Transform;
        task.outputs = vec![Template::parse("{basename}.trimmed").unwrap()];
        let params = Params::new();
        let instance = TaskInstance::new(
            &task,
            vec![PathBuf::from("s1.fq")],
            vec![PathBuf::from("out/s1.trimmed")],
            Captures::new(),
            vec![PathBuf::from("logs")],
            &params,
        )
        .unwrap();
        ScheduledInstance { index: 0, instance, task: Arc::new(task), params: Arc::new(params) }
    }

    #[tokio::test]
    async fn command_writes_staged_output_then_commits() {
        let fs = MockFileSystem::new();
        let runner = ScriptedRunner { fs: Some(fs.clone()), ..Default::default() };
        let sched = scheduled(true);

        let outcome = run_instance(&sched, Arc::new(fs.clone()), &runner).await;

        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(
            runner.seen.lock().unwrap().as_slice(),
            ["trim s1.fq -o out/.s1.trimmed.pipedag-tmp"]
        );
        assert!(fs.is_file(Path::new("out/s1.trimmed")));
        assert!(fs.is_dir(Path::new("logs")));
    }

    #[tokio::test]
    async fn failure_keeps_previous_output() {
        let fs = MockFileSystem::new();
        fs.add_file("out/s1.trimmed", "old");
        let runner = ScriptedRunner { fs: Some(fs.clone()), fail: true, ..Default::default() };

        let outcome = run_instance(&scheduled(true), Arc::new(fs.clone()), &runner).await;

        assert!(matches!(outcome, TaskOutcome::Failed(FailureCause::ExitStatus { .. })));
        assert_eq!(fs.read_to_string(Path::new("out/s1.trimmed")).unwrap(), "old");
        assert!(!fs.exists(Path::new("out/.s1.trimmed.pipedag-tmp")));
    }

    #[tokio::test]
    async fn stale_output_does_not_count_as_produced() {
        let fs = MockFileSystem::new();
        fs.add_file("out/s1.trimmed", "old");
        let runner = ScriptedRunner::default();

        let outcome = run_instance(&scheduled(true), Arc::new(fs.clone()), &runner).await;

        assert_eq!(
            outcome,
            TaskOutcome::Failed(FailureCause::MissingOutputs(vec![PathBuf::from("out/s1.trimmed")]))
        );
        assert_eq!(fs.read_to_string(Path::new("out/s1.trimmed")).unwrap(), "old");
    }

    #[tokio::test]
    async fn success_without_outputs_is_a_failure() {
        let fs = MockFileSystem::new();
        let runner = ScriptedRunner::default();

        let outcome = run_instance(&scheduled(false), Arc::new(fs), &runner).await;

        assert_eq!(
            outcome,
            TaskOutcome::Failed(FailureCause::MissingOutputs(vec![PathBuf::from("out/s1.trimmed")]))
        );
    }

    #[tokio::test]
    async fn functions_see_write_paths() {
        let fs = MockFileSystem::new();
        let mut sched = scheduled(true);
        let task = (*sched.task).clone().with_work(WorkUnit::function("touch", |ctx| {
            for out in &ctx.outputs {
                ctx.fs.write(out, b"fn")?;
            }
            Ok(())
        }));
        sched.task = Arc::new(task);

        let outcome = run_instance(&sched, Arc::new(fs.clone()), &ScriptedRunner::default()).await;

        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(fs.read_to_string(Path::new("out/s1.trimmed")).unwrap(), "fn");
    }

    #[tokio::test]
    async fn function_errors_become_failures() {
        let mut sched = scheduled(true);
        let task = (*sched.task)
            .clone()
            .with_work(WorkUnit::function("broken", |_| anyhow::bail!("no reference genome")));
        sched.task = Arc::new(task);

        let outcome =
            run_instance(&sched, Arc::new(MockFileSystem::new()), &ScriptedRunner::default()).await;

        match outcome {
            TaskOutcome::Failed(FailureCause::Function(msg)) => {
                assert!(msg.contains("no reference genome"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
