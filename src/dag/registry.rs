// src/dag/registry.rs

//! The set of declared tasks and the task-level dependency graph.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::config::model::PipelineFile;
use crate::dag::graph::find_cycle;
use crate::engine::TaskName;
use crate::errors::{PipedagError, Result};
use crate::pattern::template_matches_glob;
use crate::task::{InputSpec, Task};

/// Why one task depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Listed in `after`.
    After,
    /// `input = { task = "..." }`.
    TaskInput,
    /// A glob input matches the upstream's output template.
    FilePattern,
}

/// Task definitions in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: IndexMap<TaskName, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a validated pipeline file.
    pub fn from_config(cfg: &PipelineFile) -> Result<Self> {
        let mut registry = Self::new();
        for (name, tc) in cfg.task.iter() {
            registry.register(Task::from_config(name.clone(), tc)?)?;
        }
        Ok(registry)
    }

    /// Add a task. Names are unique; the task's kind must fit its shape.
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.name) {
            return Err(PipedagError::DuplicateTask(task.name));
        }
        task.validate_shape()?;
        debug!(task = %task.name, kind = %task.kind, "registered task");
        self.tasks.insert(task.name.clone(), task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Position of a task in declaration order.
    pub fn declaration_index(&self, name: &str) -> Option<usize> {
        self.tasks.get_index_of(name)
    }

    /// Direct upstream tasks of `name`, each with the kind of edge.
    ///
    /// Fails with `UnknownTask` when an `after` or task input names a task
    /// that is not registered.
    pub fn upstream_of(&self, name: &str) -> Result<Vec<(&Task, EdgeKind)>> {
        let task = self
            .get(name)
            .ok_or_else(|| PipedagError::UnknownTask(name.to_string()))?;

        let mut upstream: Vec<(&Task, EdgeKind)> = Vec::new();
        for dep in &task.after {
            let dep_task = self
                .get(dep)
                .ok_or_else(|| PipedagError::UnknownTask(dep.clone()))?;
            upstream.push((dep_task, EdgeKind::After));
        }

        for input in &task.inputs {
            match input {
                InputSpec::Task(dep) => {
                    let dep_task = self
                        .get(dep)
                        .ok_or_else(|| PipedagError::UnknownTask(dep.clone()))?;
                    upstream.push((dep_task, EdgeKind::TaskInput));
                }
                InputSpec::Glob(pattern) => {
                    for other in self.tasks.values() {
                        if other.name == task.name {
                            continue;
                        }
                        for template in &other.outputs {
                            if template_matches_glob(template, pattern)? {
                                upstream.push((other, EdgeKind::FilePattern));
                                break;
                            }
                        }
                    }
                }
                InputSpec::Design(_) => {}
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        upstream.retain(|(t, _)| seen.insert(t.name.as_str()));
        Ok(upstream)
    }

    /// All tasks transitively required to produce `targets`, in declaration
    /// order.
    pub fn resolve_targets<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<&Task>> {
        Ok(self.resolve_targets_where(targets, |_| true)?.0)
    }

    /// Like [`resolve_targets`](Self::resolve_targets), but the traversal
    /// does not pass through tasks rejected by `keep`.
    ///
    /// Returns the kept tasks and the rejected tasks that were reached, both
    /// in declaration order.
    pub fn resolve_targets_where<S, F>(
        &self,
        targets: &[S],
        keep: F,
    ) -> Result<(Vec<&Task>, Vec<&Task>)>
    where
        S: AsRef<str>,
        F: Fn(&Task) -> bool,
    {
        let mut stack: Vec<&Task> = Vec::new();
        for target in targets {
            let task = self
                .get(target.as_ref())
                .ok_or_else(|| PipedagError::UnknownTask(target.as_ref().to_string()))?;
            stack.push(task);
        }

        let mut kept: HashSet<&str> = HashSet::new();
        let mut rejected: HashSet<&str> = HashSet::new();

        while let Some(task) = stack.pop() {
            let name = task.name.as_str();
            if kept.contains(name) || rejected.contains(name) {
                continue;
            }
            if !keep(task) {
                rejected.insert(name);
                continue;
            }
            kept.insert(name);
            for (up, _) in self.upstream_of(name)? {
                stack.push(up);
            }
        }

        let in_order = |set: &HashSet<&str>| -> Vec<&Task> {
            self.tasks
                .values()
                .filter(|t| set.contains(t.name.as_str()))
                .collect()
        };
        Ok((in_order(&kept), in_order(&rejected)))
    }

    /// Fail with `CyclicDependency` if the given tasks form a cycle through
    /// any kind of edge.
    pub fn check_acyclic(&self, tasks: &[&Task]) -> Result<()> {
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        let members: HashSet<&str> = names.iter().copied().collect();
        let mut edges: Vec<(&str, &str)> = Vec::new();
        for task in tasks {
            for (up, _) in self.upstream_of(&task.name)? {
                if members.contains(up.name.as_str()) {
                    edges.push((up.name.as_str(), task.name.as_str()));
                }
            }
        }

        match find_cycle(&names, &edges) {
            None => Ok(()),
            Some(cycle) => Err(PipedagError::CyclicDependency(
                cycle.into_iter().map(str::to_string).collect(),
            )),
        }
    }

    /// Direct upstream names per task, restricted to `tasks`.
    pub fn upstream_map<'a>(&'a self, tasks: &[&'a Task]) -> Result<HashMap<&'a str, Vec<&'a str>>> {
        let members: HashSet<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        let mut map = HashMap::new();
        for task in tasks {
            let ups: Vec<&str> = self
                .upstream_of(&task.name)?
                .into_iter()
                .map(|(t, _)| t.name.as_str())
                .filter(|n| members.contains(n))
                .collect();
            map.insert(task.name.as_str(), ups);
        }
        Ok(map)
    }
}
