use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use pipedag::dag::ScheduledInstance;
use pipedag::engine::{FailureCause, RuntimeEvent};
use pipedag::errors::Result;
use pipedag::exec::ExecutorBackend;
use pipedag::exec::run_instance;
use pipedag::exec::staging::staged_path;
use pipedag::exec::task_runner::{CommandFuture, CommandRunner};
use pipedag::fs::FileSystem;
use pipedag::fs::mock::MockFileSystem;

/// Pretends to run commands: writes every declared output (to its staging
/// path when the task stages) unless the task is listed as failing.
#[derive(Debug)]
struct FakeRunner {
    fs: MockFileSystem,
    failing: HashSet<String>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl CommandRunner for FakeRunner {
    fn run_command<'a>(&'a self, sched: &'a ScheduledInstance, cmd: String) -> CommandFuture<'a> {
        Box::pin(async move {
            self.executed.lock().unwrap().push(cmd);
            if self.failing.contains(&sched.instance.task) || self.failing.contains(sched.id()) {
                return Err(FailureCause::ExitStatus {
                    code: Some(1),
                    stderr_tail: "simulated failure".into(),
                });
            }
            for out in &sched.instance.outputs {
                let path = if sched.task.stage_outputs {
                    staged_path(out)
                } else {
                    out.clone()
                };
                self.fs.add_file(path, sched.id());
            }
            Ok(())
        })
    }
}

/// A fake executor on a [`MockFileSystem`] that:
/// - records which instances were dispatched
/// - runs them through the real instance runner with a fake command runner
/// - immediately reports `InstanceCompleted` for each of them.
pub struct FakeExecutor {
    fs: MockFileSystem,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    runner: Arc<FakeRunner>,
    dispatched: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(fs: MockFileSystem, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runner: Arc::new(FakeRunner {
                fs: fs.clone(),
                failing: HashSet::new(),
                executed: Arc::new(Mutex::new(Vec::new())),
            }),
            fs,
            runtime_tx,
            dispatched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every instance of `task` (or the instance with that id) fail.
    pub fn failing(mut self, name: &str) -> Self {
        if let Some(runner) = Arc::get_mut(&mut self.runner) {
            runner.failing.insert(name.to_string());
        }
        self
    }

    /// Instance ids in dispatch order.
    pub fn dispatched(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.dispatched)
    }

    /// Rendered command lines in execution order.
    pub fn commands(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.runner.executed)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_instances(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let fs: Arc<dyn FileSystem> = Arc::new(self.fs.clone());
        let runner = Arc::clone(&self.runner);
        let dispatched = Arc::clone(&self.dispatched);

        Box::pin(async move {
            for sched in instances {
                dispatched.lock().unwrap().push(sched.id().to_string());
                let outcome = run_instance(&sched, Arc::clone(&fs), runner.as_ref()).await;
                tx.send(RuntimeEvent::InstanceCompleted {
                    index: sched.index,
                    id: sched.instance.id.clone(),
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
