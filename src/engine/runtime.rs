// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::ScheduledInstance;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::report::RunReport;
use super::{CoreCommand, CoreStep, RuntimeEvent};

enum Wake {
    Event(Option<RuntimeEvent>),
    CtrlC(std::io::Result<()>),
}

/// Drives the scheduler in response to `RuntimeEvent`s and delegates work
/// units to an `ExecutorBackend`.
///
/// This is an IO shell around `CoreRuntime`, which contains the runtime
/// semantics. The shell reads events from the channel, listens for Ctrl-C
/// and dispatches instances to the executor.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    handle_ctrl_c: bool,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
            handle_ctrl_c: true,
        }
    }

    /// Main event loop. Returns once every planned instance is terminal, or
    /// after an abort once running instances have drained.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(instances = self.core.scheduler().plan().len(), "pipedag runtime started");

        let step = self.core.start();
        let mut keep_running = self.apply(step).await?;

        while keep_running {
            let listen = self.handle_ctrl_c && !self.core.scheduler().is_aborted();
            let wake = tokio::select! {
                event = self.event_rx.recv() => Wake::Event(event),
                res = tokio::signal::ctrl_c(), if listen => Wake::CtrlC(res),
            };

            let event = match wake {
                Wake::Event(Some(event)) => event,
                Wake::Event(None) => {
                    warn!("runtime event channel closed before the run finished");
                    break;
                }
                Wake::CtrlC(Err(err)) => {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                    self.handle_ctrl_c = false;
                    continue;
                }
                Wake::CtrlC(Ok(())) => {
                    info!("Ctrl-C received; waiting for running instances");
                    RuntimeEvent::ShutdownRequested
                }
            };

            debug!(?event, "runtime received event");
            let step = self.core.step(event);
            keep_running = self.apply(step).await?;
        }

        if let Err(err) = self.core.ledger().compact() {
            warn!(error = %err, "failed to compact ledger");
        }

        let report = self.core.report();
        info!(
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            aborted = report.aborted,
            "runtime exiting"
        );
        Ok(report)
    }

    async fn apply(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            match command {
                CoreCommand::DispatchInstances(instances) => self.spawn_ready(instances).await?,
                CoreCommand::RequestExit => debug!("core issued RequestExit command"),
            }
        }
        Ok(step.keep_running)
    }

    async fn spawn_ready(&mut self, instances: Vec<ScheduledInstance>) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = instances.iter().map(|s| s.id()).collect();
        debug!(?ids, "dispatching ready instances");
        self.executor.spawn_ready_instances(instances).await
    }
}
