// src/dag/scheduler.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::plan::Plan;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{InstanceInfo, InstanceState, ScheduledInstance};
use crate::engine::TaskOutcome;

/// Scheduler holds the immutable plan plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a pending instance is ready (all upstreams succeeded)
/// - bounding the number of running instances
/// - recording completions and their causes
/// - blocking dependents when an instance fails
#[derive(Debug)]
pub struct Scheduler {
    plan: Arc<Plan>,
    states: Vec<InstanceInfo>,
    concurrency: usize,
    aborted: bool,
}

impl Scheduler {
    pub fn new(plan: Arc<Plan>, concurrency: usize) -> Self {
        let states = vec![InstanceInfo::default(); plan.len()];
        Self {
            plan,
            states,
            concurrency: concurrency.max(1),
            aborted: false,
        }
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    /// Read-only view of an instance's state.
    pub fn state_of(&self, idx: usize) -> Option<InstanceState> {
        self.states.get(idx).map(|i| i.state)
    }

    pub fn state_by_id(&self, id: &str) -> Option<InstanceState> {
        self.plan.index_of(id).and_then(|idx| self.state_of(idx))
    }

    pub fn cause_of(&self, idx: usize) -> Option<&str> {
        self.states.get(idx).and_then(|i| i.cause.as_deref())
    }

    pub fn running_count(&self) -> usize {
        self.states
            .iter()
            .filter(|i| i.state == InstanceState::Running)
            .count()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Whether the run is over: nothing running, and either everything is
    /// terminal or the run was aborted.
    pub fn is_finished(&self) -> bool {
        let running = self.running_count() > 0;
        if self.aborted {
            return !running;
        }
        !running && self.states.iter().all(|i| i.state.is_terminal())
    }

    /// An upstream of `idx` with declared outputs that ran in this run.
    pub fn rebuilt_upstream(&self, idx: usize) -> Option<usize> {
        let plan = &self.plan;
        ReadOnlyStateManager::new(plan.graph(), &self.states).upstream_rebuilt(idx, |dep| {
            plan.instance(dep).is_some_and(|i| !i.outputs.is_empty())
        })
    }

    /// Stop promoting new instances; running ones are left to finish.
    pub fn abort(&mut self) {
        if !self.aborted {
            warn!(
                running = self.running_count(),
                "aborting run; no new instances will be started"
            );
        }
        self.aborted = true;
    }

    /// Promote the first ready instances.
    pub fn step_start(&mut self) -> SchedulerStep {
        debug!(instances = self.states.len(), concurrency = self.concurrency, "scheduler: starting run");
        self.finish_step(Vec::new())
    }

    /// Mark a running instance as up to date without dispatching it.
    pub fn step_up_to_date(&mut self, idx: usize) -> SchedulerStep {
        match self.states.get_mut(idx) {
            Some(info) if info.state == InstanceState::Running => {
                info.state = InstanceState::UpToDate;
            }
            _ => warn!(index = idx, "up-to-date mark for an instance that is not running; ignoring"),
        }
        self.finish_step(Vec::new())
    }

    /// Record a finished work unit and promote whatever became ready.
    pub fn step_completion(&mut self, idx: usize, outcome: TaskOutcome) -> SchedulerStep {
        let mut newly_blocked = Vec::new();

        let Some(id) = self.plan.instance(idx).map(|i| i.id.clone()) else {
            warn!(index = idx, "completion for unknown instance; ignoring");
            return SchedulerStep::default();
        };

        match self.states.get(idx).map(|i| i.state) {
            Some(InstanceState::Running) => {}
            other => {
                warn!(instance = %id, state = ?other, "completion for an instance that is not running; ignoring");
                return SchedulerStep::default();
            }
        }

        match outcome {
            TaskOutcome::Success => {
                self.states[idx].state = InstanceState::Succeeded;
                debug!(instance = %id, "instance succeeded");
            }
            TaskOutcome::Failed(cause) => {
                self.states[idx].state = InstanceState::Failed;
                self.states[idx].cause = Some(cause.to_string());
                warn!(instance = %id, %cause, "instance failed; blocking dependents");

                let blocked_cause = format!("upstream {id} failed");
                let mut manager = StateManager::new(self.plan.graph(), &mut self.states);
                newly_blocked = manager.mark_dependents_blocked(idx, &blocked_cause);
            }
        }

        self.finish_step(newly_blocked)
    }

    fn finish_step(&mut self, newly_blocked: Vec<usize>) -> SchedulerStep {
        let newly_scheduled = if self.aborted {
            Vec::new()
        } else {
            let slots = self.concurrency.saturating_sub(self.running_count());
            let mut manager = StateManager::new(self.plan.graph(), &mut self.states);
            manager
                .collect_new_ready(slots)
                .into_iter()
                .filter_map(|idx| self.scheduled(idx))
                .collect()
        };

        let run_just_finished = self.is_finished();
        if run_just_finished {
            info!(aborted = self.aborted, "scheduler: run finished");
        }

        SchedulerStep {
            newly_scheduled,
            newly_blocked: newly_blocked
                .into_iter()
                .filter_map(|idx| self.plan.instance(idx).map(|i| i.id.clone()))
                .collect(),
            run_just_finished,
        }
    }

    fn scheduled(&self, idx: usize) -> Option<ScheduledInstance> {
        let instance = self.plan.instance(idx)?.clone();
        let task = self.plan.task(&instance.task)?.clone();
        Some(ScheduledInstance {
            index: idx,
            instance,
            task,
            params: self.plan.params().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use indexmap::IndexMap;

    use super::*;
    use crate::config::Params;
    use crate::config::model::{OneOrMany, TaskConfig};
    use crate::dag::{DagGraph, TaskInstance};
    use crate::engine::FailureCause;
    use crate::pattern::Captures;
    use crate::task::Task;

    /// Diamond `0 -> {1, 2} -> 3` plus an unrelated instance 4.
    fn diamond() -> Arc<Plan> {
        let cfg = TaskConfig {
            output: OneOrMany::One("out".into()),
            cmd: Some("true".into()),
            ..TaskConfig::default()
        };
        let task = Task::from_config("step", &cfg).unwrap();
        let params = Params::new();
        let instances = (0..5)
            .map(|i| {
                let out = vec![PathBuf::from(format!("o{i}"))];
                TaskInstance::new(&task, Vec::new(), out, Captures::new(), Vec::new(), &params)
                    .unwrap()
            })
            .collect();
        let graph = DagGraph::from_edges(5, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let mut tasks = IndexMap::new();
        tasks.insert("step".to_string(), Arc::new(task));
        Arc::new(Plan::new(instances, graph, tasks, Vec::new(), vec!["step".into()], params))
    }

    fn failed() -> TaskOutcome {
        TaskOutcome::Failed(FailureCause::ExitStatus {
            code: Some(1),
            stderr_tail: String::new(),
        })
    }

    fn indices(step: &SchedulerStep) -> Vec<usize> {
        step.newly_scheduled.iter().map(|s| s.index).collect()
    }

    #[test]
    fn respects_dependencies_and_concurrency() {
        let mut s = Scheduler::new(diamond(), 2);

        assert_eq!(indices(&s.step_start()), vec![0, 4]);
        assert_eq!(indices(&s.step_completion(0, TaskOutcome::Success)), vec![1]);
        assert_eq!(indices(&s.step_completion(4, TaskOutcome::Success)), vec![2]);
        assert!(indices(&s.step_completion(1, TaskOutcome::Success)).is_empty());

        let step = s.step_completion(2, TaskOutcome::Success);
        assert_eq!(indices(&step), vec![3]);
        assert!(!step.run_just_finished);

        let step = s.step_completion(3, TaskOutcome::Success);
        assert!(step.run_just_finished);
        assert_eq!(s.rebuilt_upstream(3), Some(1));
    }

    #[test]
    fn failure_blocks_the_whole_downstream_but_not_siblings() {
        let mut s = Scheduler::new(diamond(), 4);
        s.step_start();

        let step = s.step_completion(0, failed());
        assert_eq!(step.newly_blocked, vec!["step[o1]", "step[o2]", "step[o3]"]);
        assert_eq!(s.cause_of(3), Some("upstream step[o0] failed"));
        assert!(!s.is_finished());

        let step = s.step_completion(4, TaskOutcome::Success);
        assert!(step.run_just_finished);
        assert_eq!(s.state_of(0), Some(InstanceState::Failed));
        assert_eq!(s.state_of(4), Some(InstanceState::Succeeded));
    }

    #[test]
    fn up_to_date_instances_release_dependents() {
        let mut s = Scheduler::new(diamond(), 4);
        s.step_start();

        let step = s.step_up_to_date(0);
        assert_eq!(indices(&step), vec![1, 2]);
        assert_eq!(s.state_of(0), Some(InstanceState::UpToDate));

        s.step_up_to_date(1);
        s.step_up_to_date(2);
        // Nothing upstream ran, so instance 3 sees no rebuild.
        assert_eq!(s.rebuilt_upstream(3), None);
    }

    #[test]
    fn abort_stops_promotion_and_finishes_once_drained() {
        let mut s = Scheduler::new(diamond(), 4);
        s.step_start();
        s.abort();

        let step = s.step_completion(0, TaskOutcome::Success);
        assert!(step.newly_scheduled.is_empty());
        assert!(!s.is_finished());

        let step = s.step_completion(4, TaskOutcome::Success);
        assert!(step.run_just_finished);
        assert_eq!(s.state_of(3), Some(InstanceState::Pending));
    }

    #[test]
    fn stray_completions_are_ignored() {
        let mut s = Scheduler::new(diamond(), 1);
        s.step_start();

        let step = s.step_completion(3, TaskOutcome::Success);
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(s.state_of(3), Some(InstanceState::Pending));
        assert!(s.step_completion(99, TaskOutcome::Success).newly_scheduled.is_empty());
    }
}
