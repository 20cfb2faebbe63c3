#![allow(dead_code)]

use pipedag::config::model::{
    ClusterSection, DesignSection, InputEntry, OneOrMany, RawPipelineFile,
};
use pipedag::config::{PipelineFile, TaskConfig};
use pipedag::task::TaskKind;

/// Builder for `PipelineFile` to simplify test setup.
pub struct PipelineBuilder {
    raw: RawPipelineFile,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawPipelineFile::default(),
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.raw.task.insert(name.to_string(), task);
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.raw.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_design(mut self, path: &str, key_column: &str) -> Self {
        self.raw.design = Some(DesignSection {
            path: path.to_string(),
            key_column: key_column.to_string(),
        });
        self
    }

    pub fn with_cluster(mut self, submit: &str, status: Option<&str>) -> Self {
        self.raw.cluster = Some(ClusterSection {
            submit: submit.to_string(),
            status: status.map(str::to_string),
            poll_interval_ms: 10,
            job_dir: ".pipedag/jobs".to_string(),
            job_timeout_secs: None,
        });
        self
    }

    pub fn default_target(mut self, target: &str) -> Self {
        self.raw.pipeline.default_target = Some(target.to_string());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.raw.pipeline.concurrency = n;
        self
    }

    pub fn build(self) -> PipelineFile {
        PipelineFile::try_from(self.raw).expect("Failed to build valid pipeline from builder")
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
    inputs: Vec<InputEntry>,
    outputs: Vec<String>,
    active_if: Vec<String>,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: Some(cmd.to_string()),
                ..TaskConfig::default()
            },
            inputs: Vec::new(),
            outputs: Vec::new(),
            active_if: Vec::new(),
        }
    }

    /// A grouping target without a command.
    pub fn target() -> Self {
        let mut b = Self::new("");
        b.task.cmd = None;
        b
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.task.kind = Some(kind);
        self
    }

    pub fn input(mut self, glob: &str) -> Self {
        self.inputs.push(InputEntry::Pattern(glob.to_string()));
        self
    }

    pub fn input_task(mut self, task: &str) -> Self {
        self.inputs.push(InputEntry::Task {
            task: task.to_string(),
        });
        self
    }

    pub fn input_design(mut self, column: &str) -> Self {
        self.inputs.push(InputEntry::Design {
            design: column.to_string(),
        });
        self
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.task.suffix = Some(suffix.to_string());
        self
    }

    pub fn regex(mut self, re: &str) -> Self {
        self.task.regex = Some(re.to_string());
        self
    }

    pub fn output(mut self, template: &str) -> Self {
        self.outputs.push(template.to_string());
        self
    }

    pub fn extra_input(mut self, template: &str) -> Self {
        self.task.extra_inputs.push(template.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn active_if(mut self, expr: &str) -> Self {
        self.active_if.push(expr.to_string());
        self
    }

    pub fn mkdir(mut self, dir: &str) -> Self {
        self.task.mkdir.push(dir.to_string());
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.task.idempotent = true;
        self
    }

    pub fn no_staging(mut self) -> Self {
        self.task.stage_outputs = false;
        self
    }

    pub fn build(mut self) -> TaskConfig {
        self.task.input = OneOrMany::Many(self.inputs);
        self.task.output = OneOrMany::Many(self.outputs);
        self.task.active_if = OneOrMany::Many(self.active_if);
        self.task
    }
}
