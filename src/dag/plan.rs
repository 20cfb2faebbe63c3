// src/dag/plan.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::Params;
use crate::dag::graph::DagGraph;
use crate::dag::instance::{InstanceId, TaskInstance};
use crate::engine::TaskName;
use crate::task::Task;

/// Resolved, ordered instances for one invocation.
///
/// Instances are stored in execution order; the graph is indexed by the
/// same positions.
#[derive(Debug, Clone)]
pub struct Plan {
    instances: Vec<TaskInstance>,
    graph: DagGraph,
    tasks: IndexMap<TaskName, Arc<Task>>,
    index: HashMap<InstanceId, usize>,
    pruned: Vec<TaskName>,
    targets: Vec<TaskName>,
    params: Arc<Params>,
}

impl Plan {
    pub(crate) fn new(
        instances: Vec<TaskInstance>,
        graph: DagGraph,
        tasks: IndexMap<TaskName, Arc<Task>>,
        pruned: Vec<TaskName>,
        targets: Vec<TaskName>,
        params: Params,
    ) -> Self {
        let index = instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (inst.id.clone(), i))
            .collect();
        Self {
            instances,
            graph,
            tasks,
            index,
            pruned,
            targets,
            params: Arc::new(params),
        }
    }

    pub fn instances(&self) -> &[TaskInstance] {
        &self.instances
    }

    pub fn instance(&self, idx: usize) -> Option<&TaskInstance> {
        self.instances.get(idx)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    /// Task definition an instance was expanded from.
    pub fn task_of(&self, idx: usize) -> Option<&Arc<Task>> {
        self.instance(idx).and_then(|inst| self.tasks.get(&inst.task))
    }

    /// Outputs of the direct upstream instances of `idx`.
    pub fn upstream_outputs(&self, idx: usize) -> Vec<&Path> {
        self.graph
            .dependencies_of(idx)
            .iter()
            .filter_map(|&dep| self.instances.get(dep))
            .flat_map(|inst| inst.outputs.iter().map(|p| p.as_path()))
            .collect()
    }

    /// Active tasks that were reached from the targets, in declaration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Tasks dropped because their activation predicate was false.
    pub fn pruned(&self) -> &[TaskName] {
        &self.pruned
    }

    pub fn targets(&self) -> &[TaskName] {
        &self.targets
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
