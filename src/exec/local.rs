// src/exec/local.rs

//! Local execution: every command runs as `sh -c` in the pipeline root.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dag::ScheduledInstance;
use crate::engine::{FailureCause, RuntimeEvent};
use crate::errors::Result;
use crate::exec::backend::ExecutorBackend;
use crate::exec::task_runner::{CommandFuture, CommandRunner, Dispatcher};
use crate::fs::FileSystem;

/// Number of stderr lines kept for failure reports.
pub const STDERR_TAIL_LINES: usize = 20;

/// Runs command lines through the local shell.
#[derive(Debug, Clone)]
pub struct LocalCommandRunner {
    workdir: PathBuf,
}

impl LocalCommandRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }
}

impl CommandRunner for LocalCommandRunner {
    fn run_command<'a>(&'a self, sched: &'a ScheduledInstance, cmd: String) -> CommandFuture<'a> {
        Box::pin(async move {
            info!(instance = %sched.id(), cmd = %cmd, "starting command");

            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .current_dir(&self.workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| FailureCause::Spawn(format!("sh -c {cmd:?}: {e}")))?;

            if let Some(stdout) = child.stdout.take() {
                let id = sched.instance.id.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(instance = %id, "stdout: {}", line);
                    }
                });
            }

            let stderr_tail = child.stderr.take().map(|stderr| {
                let id = sched.instance.id.clone();
                tokio::spawn(async move {
                    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(instance = %id, "stderr: {}", line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Vec::from(tail).join("\n")
                })
            });

            let status = child
                .wait()
                .await
                .map_err(|e| FailureCause::Spawn(format!("waiting for command: {e}")))?;

            let stderr_tail = match stderr_tail {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };

            debug!(instance = %sched.id(), code = ?status.code(), "command exited");
            if status.success() {
                Ok(())
            } else {
                Err(FailureCause::ExitStatus {
                    code: status.code(),
                    stderr_tail,
                })
            }
        })
    }
}

/// Backend that runs every instance on this machine.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    dispatcher: Dispatcher,
}

impl LocalBackend {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        concurrency: usize,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let runner = Arc::new(LocalCommandRunner::new(fs.root()));
        Self {
            dispatcher: Dispatcher::new(fs, runner, concurrency, runtime_tx),
        }
    }
}

impl ExecutorBackend for LocalBackend {
    fn spawn_ready_instances(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for sched in instances {
                self.dispatcher.dispatch(sched);
            }
            Ok(())
        })
    }
}
