use indexmap::IndexMap;
use serde::Deserialize;

use crate::task::TaskKind;
use crate::types::{BackendKind, LedgerStorage};

/// Top-level pipeline file as read from TOML.
///
/// ```toml
/// [pipeline]
/// concurrency = 4
/// default_target = "full"
///
/// [params]
/// homer = true
/// homer_findpeaks_style = "factor"
///
/// [design]
/// path = "design.tsv"
/// key_column = "bamReads"
///
/// [task.trim]
/// input = "*.fastq.gz"
/// suffix = ".fastq.gz"
/// output = "{basename}.trimmed.fastq.gz"
/// cmd = "trim_galore {input} -o {output}"
/// ```
///
/// Task declaration order is kept; it breaks ties in the execution order.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Opaque option table; see [`crate::config::Params`].
    #[serde(default)]
    pub params: toml::Table,

    #[serde(default)]
    pub design: Option<DesignSection>,

    #[serde(default)]
    pub cluster: Option<ClusterSection>,

    #[serde(default)]
    pub task: IndexMap<String, TaskConfig>,
}

/// Validated pipeline file. Construct via `TryFrom<RawPipelineFile>`.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub pipeline: PipelineSection,
    pub params: toml::Table,
    pub design: Option<DesignSection>,
    pub cluster: Option<ClusterSection>,
    pub task: IndexMap<String, TaskConfig>,
}

impl PipelineFile {
    pub(crate) fn new_unchecked(raw: RawPipelineFile) -> Self {
        Self {
            pipeline: raw.pipeline,
            params: raw.params,
            design: raw.design,
            cluster: raw.cluster,
            task: raw.task,
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Maximum number of instances running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub ledger: LedgerStorage,

    /// Ledger file, relative to the pipeline root.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Target used by `run` / `show-plan` when none is given.
    #[serde(default)]
    pub default_target: Option<String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_ledger_path() -> String {
    ".pipedag/ledger.jsonl".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            backend: BackendKind::default(),
            ledger: LedgerStorage::default(),
            ledger_path: default_ledger_path(),
            default_target: None,
        }
    }
}

/// `[design]` section: the sample design table.
#[derive(Debug, Clone, Deserialize)]
pub struct DesignSection {
    /// Tab-separated file with a header row.
    pub path: String,
    /// Column whose values identify the primary input of each row.
    pub key_column: String,
}

/// `[cluster]` section, required when `backend = "cluster"`.
///
/// ```toml
/// [cluster]
/// submit = "sbatch --parsable -J {name} {script}"
/// status = "squeue -h -j {job}"
/// poll_interval_ms = 5000
/// job_timeout_secs = 86400
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    /// Submission command; `{script}` and `{name}` are substituted and the
    /// last whitespace-separated token of stdout is taken as the job id.
    pub submit: String,

    /// Optional status command (`{job}` substituted). A non-zero exit while
    /// the job has not written its exit marker means the job vanished.
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory for job scripts and exit markers, relative to the root.
    #[serde(default = "default_job_dir")]
    pub job_dir: String,

    /// Give up on a job that has not written its exit marker after this
    /// many seconds. Unset means wait indefinitely.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_job_dir() -> String {
    ".pipedag/jobs".to_string()
}

/// Either a single value or a list, for fields like `input` and `output`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v.clone()],
            OneOrMany::Many(vs) => vs.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OneOrMany::One(_) => false,
            OneOrMany::Many(vs) => vs.is_empty(),
        }
    }
}

/// One entry of a task's `input`.
///
/// ```toml
/// input = "*.bam"                       # glob (or literal path)
/// input = { task = "findPeaks" }        # outputs of another task
/// input = { design = "bamReads" }       # a design-table column
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputEntry {
    Pattern(String),
    Task { task: String },
    Design { design: String },
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// `transform`, `merge`, `originate` or `target`; inferred when omitted.
    #[serde(default)]
    pub kind: Option<TaskKind>,

    #[serde(default)]
    pub input: OneOrMany<InputEntry>,

    /// Regex an input path must match; its groups feed output templates.
    #[serde(default)]
    pub regex: Option<String>,

    /// Suffix an input file name must end with; stripped into `{basename}`.
    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default)]
    pub output: OneOrMany<String>,

    /// Additional per-instance inputs, e.g. `"{design:bamControl}"`.
    #[serde(default)]
    pub extra_inputs: Vec<String>,

    /// Command template. Omitted for pure grouping targets.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Tasks that must complete first even without a file relationship.
    #[serde(default)]
    pub after: Vec<String>,

    /// Activation predicate expressions; all must hold.
    #[serde(default)]
    pub active_if: OneOrMany<String>,

    /// Directories created before the work unit runs.
    #[serde(default)]
    pub mkdir: Vec<String>,

    /// For tasks without outputs: skip when the ledger records a success.
    #[serde(default)]
    pub idempotent: bool,

    /// Write outputs to temporary paths and rename them on success.
    #[serde(default = "default_true")]
    pub stage_outputs: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            kind: None,
            input: OneOrMany::default(),
            regex: None,
            suffix: None,
            output: OneOrMany::default(),
            extra_inputs: Vec::new(),
            cmd: None,
            after: Vec::new(),
            active_if: OneOrMany::default(),
            mkdir: Vec::new(),
            idempotent: false,
            stage_outputs: true,
        }
    }
}
