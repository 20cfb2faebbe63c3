// src/config/validate.rs

use tracing::warn;

use crate::config::model::{InputEntry, PipelineFile, RawPipelineFile};
use crate::dag::graph::find_cycle;
use crate::errors::{PipedagError, Result};
use crate::pattern::validate_glob;
use crate::task::Task;
use crate::types::BackendKind;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = PipedagError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_pipeline(&raw)?;
        Ok(PipelineFile::new_unchecked(raw))
    }
}

fn validate_raw_pipeline(cfg: &RawPipelineFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_pipeline_section(cfg)?;
    validate_task_references(cfg)?;
    validate_task_definitions(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PipedagError::ConfigError(
            "pipeline must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.pipeline.concurrency == 0 {
        return Err(PipedagError::ConfigError(
            "[pipeline].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.pipeline.backend == BackendKind::Cluster && cfg.cluster.is_none() {
        return Err(PipedagError::ConfigError(
            "[pipeline].backend = \"cluster\" requires a [cluster] section".to_string(),
        ));
    }

    if let Some(cluster) = &cfg.cluster {
        if cluster.job_timeout_secs == Some(0) {
            return Err(PipedagError::ConfigError(
                "[cluster].job_timeout_secs must be >= 1 (got 0)".to_string(),
            ));
        }
        if cluster.status.is_none() && cluster.job_timeout_secs.is_none() {
            warn!(
                "[cluster] has neither `status` nor `job_timeout_secs`; a job killed before \
                 writing its exit marker will be waited on forever"
            );
        }
    }

    if let Some(target) = &cfg.pipeline.default_target {
        if !cfg.task.contains_key(target) {
            return Err(PipedagError::UnknownTask(target.clone()));
        }
    }

    Ok(())
}

fn validate_task_references(cfg: &RawPipelineFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(PipedagError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(PipedagError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }

        for entry in task.input.to_vec() {
            match entry {
                InputEntry::Task { task: dep } => {
                    if !cfg.task.contains_key(&dep) {
                        return Err(PipedagError::ConfigError(format!(
                            "task '{}' has unknown task '{}' in `input`",
                            name, dep
                        )));
                    }
                    if &dep == name {
                        return Err(PipedagError::ConfigError(format!(
                            "task '{}' cannot consume its own outputs",
                            name
                        )));
                    }
                }
                InputEntry::Design { design } if cfg.design.is_none() => {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{}' reads design column '{}' but there is no [design] section",
                        name, design
                    )));
                }
                InputEntry::Pattern(pattern) => validate_glob(&pattern)?,
                InputEntry::Design { .. } => {}
            }
        }
    }
    Ok(())
}

fn validate_task_definitions(cfg: &RawPipelineFile) -> Result<()> {
    for (name, tc) in cfg.task.iter() {
        // Parses regexes, templates and activation expressions.
        let task = Task::from_config(name.clone(), tc)?;
        task.validate_shape()?;

        let uses_design = task
            .outputs
            .iter()
            .chain(task.extra_inputs.iter())
            .chain(task.mkdir.iter())
            .flat_map(|t| t.placeholders())
            .any(|p| p.starts_with("design:"));
        if uses_design && cfg.design.is_none() {
            return Err(PipedagError::ConfigError(format!(
                "task '{}' uses a {{design:..}} placeholder but there is no [design] section",
                name
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawPipelineFile) -> Result<()> {
    // Edge direction: dep -> task. Implicit file edges are checked once the
    // registry is built.
    let nodes: Vec<&str> = cfg.task.keys().map(String::as_str).collect();
    let mut edges: Vec<(&str, &str)> = Vec::new();

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            edges.push((dep.as_str(), name.as_str()));
        }
        for entry in task.input.to_vec() {
            if let InputEntry::Task { task: dep } = entry {
                if let Some((key, _)) = cfg.task.get_key_value(&dep) {
                    edges.push((key.as_str(), name.as_str()));
                }
            }
        }
    }

    match find_cycle(&nodes, &edges) {
        None => Ok(()),
        Some(cycle) => Err(PipedagError::CyclicDependency(
            cycle.into_iter().map(str::to_string).collect(),
        )),
    }
}
