// src/dag/state_manager.rs

//! Per-run state transitions for instances in the scheduler.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::dag::task_info::{InstanceInfo, InstanceState};
use crate::dag::DagGraph;

/// Manages per-run state transitions for instances.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    states: &'a mut [InstanceInfo],
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DagGraph, states: &'a mut [InstanceInfo]) -> Self {
        Self { graph, states }
    }

    /// Mark every pending transitive dependent of `failed` as `Blocked`.
    ///
    /// Returns the newly blocked positions, in plan order.
    pub fn mark_dependents_blocked(&mut self, failed: usize, cause: &str) -> Vec<usize> {
        let mut stack: Vec<usize> = self.graph.dependents_of(failed).to_vec();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut newly_blocked = Vec::new();

        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let Some(info) = self.states.get_mut(idx) else {
                continue;
            };
            if info.state == InstanceState::Pending {
                info.state = InstanceState::Blocked;
                info.cause = Some(cause.to_string());
                debug!(index = idx, cause, "marking dependent Blocked");
                newly_blocked.push(idx);
            }
            stack.extend(self.graph.dependents_of(idx).iter().copied());
        }

        newly_blocked.sort_unstable();
        newly_blocked
    }

    /// Promote `Pending` instances whose upstreams all succeeded to
    /// `Running`, in plan order, at most `limit` of them.
    pub fn collect_new_ready(&mut self, limit: usize) -> Vec<usize> {
        if limit == 0 {
            return Vec::new();
        }

        // Decide first, then mutate.
        let ro = ReadOnlyStateManager::new(self.graph, self.states);
        let candidates: Vec<usize> = (0..self.states.len())
            .filter(|&idx| {
                self.states[idx].state == InstanceState::Pending && ro.deps_satisfied(idx)
            })
            .take(limit)
            .collect();

        for &idx in &candidates {
            self.states[idx].state = InstanceState::Running;
        }
        if !candidates.is_empty() {
            info!(count = candidates.len(), "instances ready");
        }
        candidates
    }
}

/// A read-only view for checking dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a DagGraph,
    states: &'a [InstanceInfo],
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a DagGraph, states: &'a [InstanceInfo]) -> Self {
        Self { graph, states }
    }

    /// Every upstream of `idx` is `UpToDate` or `Succeeded`.
    pub fn deps_satisfied(&self, idx: usize) -> bool {
        self.graph.dependencies_of(idx).iter().all(|&dep| {
            self.states
                .get(dep)
                .is_some_and(|info| info.state.is_success())
        })
    }

    /// Some upstream of `idx` that declares outputs was rebuilt in this run.
    pub fn upstream_rebuilt(&self, idx: usize, has_outputs: impl Fn(usize) -> bool) -> Option<usize> {
        self.graph
            .dependencies_of(idx)
            .iter()
            .copied()
            .find(|&dep| {
                self.states
                    .get(dep)
                    .is_some_and(|info| info.state == InstanceState::Succeeded)
                    && has_outputs(dep)
            })
    }
}
