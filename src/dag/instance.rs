// src/dag/instance.rs

//! Concrete task instances and their rendering context.

use std::path::{Path, PathBuf};

use crate::config::Params;
use crate::engine::TaskName;
use crate::errors::Result;
use crate::pattern::{Captures, Template};
use crate::task::{Task, WorkUnit};

/// Unique, stable identity of an instance across runs.
pub type InstanceId = String;

/// One materialization of a [`Task`] for a matched input set.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub task: TaskName,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Regex groups, derived names and `design:<column>` values.
    pub captures: Captures,
    /// Directories to create before the work unit runs.
    pub mkdirs: Vec<PathBuf>,
    /// blake3 of the rendered work unit, inputs and outputs.
    pub fingerprint: String,
}

impl TaskInstance {
    pub fn new(
        task: &Task,
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
        captures: Captures,
        mkdirs: Vec<PathBuf>,
        params: &Params,
    ) -> Result<Self> {
        let mut instance = Self {
            id: instance_id(&task.name, &inputs, &outputs),
            task: task.name.clone(),
            inputs,
            outputs,
            captures,
            mkdirs,
            fingerprint: String::new(),
        };
        instance.fingerprint = instance.compute_fingerprint(task, params)?;
        Ok(instance)
    }

    /// Value for one `{placeholder}` of a command template.
    pub fn lookup(&self, key: &str, params: &Params) -> Option<String> {
        match key {
            "input" => Some(join_paths(&self.inputs)),
            "output" => Some(join_paths(&self.outputs)),
            _ => {
                if let Some(n) = key.strip_prefix("input:") {
                    let idx: usize = n.parse().ok()?;
                    return self.inputs.get(idx).map(|p| p.display().to_string());
                }
                if let Some(n) = key.strip_prefix("output:") {
                    let idx: usize = n.parse().ok()?;
                    return self.outputs.get(idx).map(|p| p.display().to_string());
                }
                if let Some(name) = key.strip_prefix("param:") {
                    return params.render(name);
                }
                self.captures.get(key).cloned()
            }
        }
    }

    /// Render a template against this instance.
    pub fn render(&self, template: &Template, params: &Params) -> Result<String> {
        template.render(|key| self.lookup(key, params))
    }

    /// Rendered command line, if the work unit is a command.
    pub fn command_line(&self, task: &Task, params: &Params) -> Result<Option<String>> {
        match &task.work {
            WorkUnit::Command(template) => self.render(template, params).map(Some),
            WorkUnit::Function { .. } | WorkUnit::Noop => Ok(None),
        }
    }

    fn compute_fingerprint(&self, task: &Task, params: &Params) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(task.name.as_bytes());
        hasher.update(&[0]);
        match &task.work {
            WorkUnit::Command(_) => {
                let cmd = self.command_line(task, params)?.unwrap_or_default();
                hasher.update(b"cmd:");
                hasher.update(cmd.as_bytes());
            }
            WorkUnit::Function { label, .. } => {
                hasher.update(b"fn:");
                hasher.update(label.as_bytes());
            }
            WorkUnit::Noop => {
                hasher.update(b"noop");
            }
        }
        hash_paths(&mut hasher, b"in", &self.inputs);
        hash_paths(&mut hasher, b"out", &self.outputs);
        Ok(hasher.finalize().to_hex().to_string())
    }
}

fn hash_paths(hasher: &mut blake3::Hasher, tag: &[u8], paths: &[PathBuf]) {
    hasher.update(&[0]);
    hasher.update(tag);
    for p in paths {
        hasher.update(&[0]);
        hasher.update(p.to_string_lossy().as_bytes());
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `task[outputs]`, else `task[inputs]`, else `task`.
pub fn instance_id(task: &str, inputs: &[PathBuf], outputs: &[PathBuf]) -> InstanceId {
    let shown: &[PathBuf] = if !outputs.is_empty() { outputs } else { inputs };
    if shown.is_empty() {
        return task.to_string();
    }
    let parts: Vec<String> = shown.iter().map(|p| display_path(p)).collect();
    format!("{task}[{}]", parts.join(", "))
}

fn display_path(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}
