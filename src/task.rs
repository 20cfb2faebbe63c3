// src/task.rs

//! Declarative task definitions.
//!
//! A [`Task`] is built once (from a `[task.<name>]` section or
//! programmatically) and registered into a
//! [`TaskRegistry`](crate::dag::TaskRegistry); it is never mutated
//! afterwards. Concrete work happens on the
//! [`TaskInstance`](crate::dag::TaskInstance)s the resolver expands it into.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::config::model::{InputEntry, TaskConfig};
use crate::config::Params;
use crate::engine::TaskName;
use crate::errors::{PipedagError, Result};
use crate::exec::WorkContext;
use crate::pattern::Template;

/// How inputs map to instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// One instance per matched input.
    Transform,
    /// One instance consuming every matched input.
    Merge,
    /// No inputs; one instance per declared output.
    Originate,
    /// No inputs or outputs; groups other tasks via `after`.
    Target,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Transform => "transform",
            TaskKind::Merge => "merge",
            TaskKind::Originate => "originate",
            TaskKind::Target => "target",
        };
        f.write_str(s)
    }
}

/// Where a task's inputs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// Files matching a glob (a literal path is a glob without wildcards),
    /// including planned outputs of upstream tasks.
    Glob(String),
    /// Every output of another task's instances.
    Task(TaskName),
    /// Values of a design-table column.
    Design(String),
}

impl From<&InputEntry> for InputSpec {
    fn from(entry: &InputEntry) -> Self {
        match entry {
            InputEntry::Pattern(p) => InputSpec::Glob(p.clone()),
            InputEntry::Task { task } => InputSpec::Task(task.clone()),
            InputEntry::Design { design } => InputSpec::Design(design.clone()),
        }
    }
}

/// Activation predicate evaluated against the run's [`Params`].
#[derive(Clone)]
pub enum Predicate {
    Always,
    Truthy(String),
    Not(Box<Predicate>),
    Equals(String, String),
    All(Vec<Predicate>),
    Custom(Arc<dyn Fn(&Params) -> bool + Send + Sync>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("Always"),
            Predicate::Truthy(k) => f.debug_tuple("Truthy").field(k).finish(),
            Predicate::Not(p) => f.debug_tuple("Not").field(p).finish(),
            Predicate::Equals(k, v) => f.debug_tuple("Equals").field(k).field(v).finish(),
            Predicate::All(ps) => f.debug_tuple("All").field(ps).finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Predicate {
    /// Parse one expression: `key`, `!key`, `key == value`, `key != value`.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if let Some((key, value)) = expr.split_once("!=") {
            let (key, value) = (check_key(key, expr)?, unquote(value));
            return Ok(Predicate::Not(Box::new(Predicate::Equals(key, value))));
        }
        if let Some((key, value)) = expr.split_once("==") {
            let (key, value) = (check_key(key, expr)?, unquote(value));
            return Ok(Predicate::Equals(key, value));
        }
        if let Some(rest) = expr.strip_prefix('!') {
            return Ok(Predicate::Not(Box::new(Predicate::Truthy(check_key(rest, expr)?))));
        }
        Ok(Predicate::Truthy(check_key(expr, expr)?))
    }

    /// Conjunction of expressions; an empty list is `Always`.
    pub fn all<S: AsRef<str>>(exprs: &[S]) -> Result<Self> {
        let mut preds = exprs
            .iter()
            .map(|e| Predicate::parse(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(match preds.len() {
            0 => Predicate::Always,
            1 => preds.remove(0),
            _ => Predicate::All(preds),
        })
    }

    pub fn evaluate(&self, params: &Params) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Truthy(key) => params.is_truthy(key),
            Predicate::Not(inner) => !inner.evaluate(params),
            Predicate::Equals(key, value) => params.render(key).as_deref() == Some(value.as_str()),
            Predicate::All(preds) => preds.iter().all(|p| p.evaluate(params)),
            Predicate::Custom(f) => f(params),
        }
    }
}

fn check_key(key: &str, expr: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(PipedagError::ConfigError(format!(
            "invalid activation expression {expr:?}"
        )));
    }
    Ok(key.to_string())
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}

/// In-process work unit body.
pub type WorkFn = Arc<dyn Fn(&WorkContext) -> anyhow::Result<()> + Send + Sync>;

/// What an instance does when it runs.
#[derive(Clone)]
pub enum WorkUnit {
    /// Shell command template, run with `sh -c`.
    Command(Template),
    /// In-process function; always runs on the local machine.
    Function { label: String, func: WorkFn },
    /// Nothing to do (grouping targets).
    Noop,
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Command(t) => f.debug_tuple("Command").field(&t.as_str()).finish(),
            WorkUnit::Function { label, .. } => f.debug_tuple("Function").field(label).finish(),
            WorkUnit::Noop => f.write_str("Noop"),
        }
    }
}

impl WorkUnit {
    pub fn function<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&WorkContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        WorkUnit::Function {
            label: label.into(),
            func: Arc::new(func),
        }
    }
}

/// A declarative unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: TaskName,
    pub kind: TaskKind,
    pub inputs: Vec<InputSpec>,
    pub filter: Option<Regex>,
    pub suffix: Option<String>,
    pub outputs: Vec<Template>,
    pub extra_inputs: Vec<Template>,
    pub after: Vec<TaskName>,
    pub predicate: Predicate,
    pub work: WorkUnit,
    pub mkdir: Vec<Template>,
    pub idempotent: bool,
    pub stage_outputs: bool,
}

impl Task {
    pub fn from_config(name: impl Into<TaskName>, cfg: &TaskConfig) -> Result<Self> {
        let name = name.into();
        let inputs: Vec<InputSpec> = cfg.input.to_vec().iter().map(InputSpec::from).collect();
        let outputs = parse_templates(&cfg.output.to_vec())?;

        let kind = cfg.kind.unwrap_or(match (inputs.is_empty(), outputs.is_empty()) {
            (true, true) => TaskKind::Target,
            (true, false) => TaskKind::Originate,
            (false, _) => TaskKind::Transform,
        });

        let filter = cfg.regex.as_deref().map(Regex::new).transpose()?;
        let work = match cfg.cmd.as_deref() {
            Some(cmd) => WorkUnit::Command(Template::parse(cmd)?),
            None => WorkUnit::Noop,
        };

        Ok(Self {
            name,
            kind,
            inputs,
            filter,
            suffix: cfg.suffix.clone(),
            outputs,
            extra_inputs: parse_templates(&cfg.extra_inputs)?,
            after: cfg.after.clone(),
            predicate: Predicate::all(&cfg.active_if.to_vec())?,
            work,
            mkdir: parse_templates(&cfg.mkdir)?,
            idempotent: cfg.idempotent,
            stage_outputs: cfg.stage_outputs,
        })
    }

    /// Replace the work unit, e.g. with an in-process function.
    pub fn with_work(mut self, work: WorkUnit) -> Self {
        self.work = work;
        self
    }

    /// Replace the activation predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Check that inputs and outputs fit the task kind.
    pub fn validate_shape(&self) -> Result<()> {
        let problem = match self.kind {
            TaskKind::Transform if self.inputs.is_empty() => Some("a transform needs `input`"),
            TaskKind::Transform if self.outputs.is_empty() => Some("a transform needs `output`"),
            TaskKind::Merge if self.inputs.is_empty() => Some("a merge needs `input`"),
            TaskKind::Originate if !self.inputs.is_empty() => {
                Some("an originate task takes no `input`")
            }
            TaskKind::Originate if self.outputs.is_empty() => {
                Some("an originate task needs `output`")
            }
            TaskKind::Target if !self.inputs.is_empty() || !self.outputs.is_empty() => {
                Some("a target takes no `input` or `output`")
            }
            _ => None,
        };
        match problem {
            Some(msg) => Err(PipedagError::ConfigError(format!(
                "task '{}' ({}): {msg}",
                self.name, self.kind
            ))),
            None => Ok(()),
        }
    }
}

fn parse_templates(raw: &[String]) -> Result<Vec<Template>> {
    raw.iter().map(|s| Template::parse(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;

    #[test]
    fn predicates_parse_and_evaluate() {
        let params = Params::new()
            .with("homer", ParamValue::Bool(true))
            .with("deeptools", ParamValue::Bool(false))
            .with("deep_plot", ParamValue::Str("heatmap".into()));

        assert!(Predicate::parse("homer").unwrap().evaluate(&params));
        assert!(Predicate::parse("!deeptools").unwrap().evaluate(&params));
        assert!(Predicate::parse("deep_plot == heatmap").unwrap().evaluate(&params));
        assert!(Predicate::parse("deep_plot == \"heatmap\"").unwrap().evaluate(&params));
        assert!(Predicate::parse("deep_plot != profile").unwrap().evaluate(&params));
        assert!(!Predicate::all(&["homer", "deeptools"]).unwrap().evaluate(&params));
        assert!(Predicate::all::<&str>(&[]).unwrap().evaluate(&params));
        assert!(Predicate::parse("two words").is_err());
        assert!(Predicate::parse("!").is_err());

        let custom = Task::from_config("homer_annotate", &TaskConfig::default())
            .unwrap()
            .with_predicate(Predicate::Custom(Arc::new(|p| p.get("genome").is_some())));
        assert!(!custom.predicate.evaluate(&params));
        assert!(custom.predicate.evaluate(&params.clone().with("genome", ParamValue::Str("hg38".into()))));
    }

    #[test]
    fn kind_is_inferred_from_shape() {
        let origin = TaskConfig {
            output: crate::config::model::OneOrMany::One("MultiQC_report.dir/multiqc_report.html".into()),
            cmd: Some("multiqc . -f".into()),
            ..TaskConfig::default()
        };
        assert_eq!(Task::from_config("renderMultiqc", &origin).unwrap().kind, TaskKind::Originate);

        let target = TaskConfig {
            after: vec!["renderMultiqc".into()],
            ..TaskConfig::default()
        };
        let task = Task::from_config("build_report", &target).unwrap();
        assert_eq!(task.kind, TaskKind::Target);
        assert!(matches!(task.work, WorkUnit::Noop));
    }

    #[test]
    fn shape_validation_rejects_mismatched_kinds() {
        let cfg = TaskConfig {
            kind: Some(TaskKind::Merge),
            output: crate::config::model::OneOrMany::One("all.txt".into()),
            ..TaskConfig::default()
        };
        let task = Task::from_config("merge_nothing", &cfg).unwrap();
        assert!(matches!(task.validate_shape(), Err(PipedagError::ConfigError(_))));
    }
}
