// src/exec/cluster.rs

//! Cluster execution: commands are wrapped into job scripts, submitted
//! through a configurable submit command and polled until they write an
//! exit marker. In-process functions still run locally.

use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::model::ClusterSection;
use crate::dag::ScheduledInstance;
use crate::engine::{FailureCause, RuntimeEvent};
use crate::errors::Result;
use crate::exec::backend::ExecutorBackend;
use crate::exec::local::STDERR_TAIL_LINES;
use crate::exec::task_runner::{CommandFuture, CommandRunner, Dispatcher};
use crate::fs::FileSystem;

/// Consecutive poll errors tolerated before a job counts as lost.
const MAX_POLL_ERRORS: u32 = 3;

pub type JobFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// A job to submit.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Human readable job name (the instance id).
    pub name: String,
    pub command: String,
    pub workdir: PathBuf,
}

/// A submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
    /// File the job writes its exit code to.
    pub marker: PathBuf,
    /// Combined stdout/stderr of the job.
    pub log: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done { exit_code: i32, log_tail: String },
    /// The queue no longer knows the job and it left no exit marker.
    Vanished,
}

/// A batch queue.
pub trait JobQueue: Send + Sync + Debug {
    fn submit<'a>(&'a self, spec: &'a JobSpec) -> JobFuture<'a, JobHandle>;
    fn poll<'a>(&'a self, job: &'a JobHandle) -> JobFuture<'a, JobStatus>;
}

/// Queue driven by external `submit` / `status` commands (`sbatch`,
/// `qsub`, ...).
#[derive(Debug)]
pub struct CommandJobQueue {
    job_dir: PathBuf,
    submit: String,
    status: Option<String>,
    seq: AtomicU64,
}

impl CommandJobQueue {
    /// `job_dir` should be absolute; job scripts may run on other hosts that
    /// share the filesystem.
    pub fn new(job_dir: impl Into<PathBuf>, submit: impl Into<String>, status: Option<String>) -> Self {
        Self {
            job_dir: job_dir.into(),
            submit: submit.into(),
            status,
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(root: &Path, cfg: &ClusterSection) -> Self {
        Self::new(root.join(&cfg.job_dir), cfg.submit.clone(), cfg.status.clone())
    }

    fn job_script(spec: &JobSpec, log: &Path, marker: &Path) -> String {
        let tmp = marker.with_extension("exit.tmp");
        format!(
            "#!/bin/sh\n\
             cd {workdir} || exit 1\n\
             ( {command} ) > {log} 2>&1\n\
             code=$?\n\
             echo $code > {tmp} && mv {tmp} {marker}\n\
             exit $code\n",
            workdir = shell_quote(&spec.workdir.display().to_string()),
            command = spec.command,
            log = shell_quote(&log.display().to_string()),
            tmp = shell_quote(&tmp.display().to_string()),
            marker = shell_quote(&marker.display().to_string()),
        )
    }

    async fn read_done(job: &JobHandle) -> anyhow::Result<Option<JobStatus>> {
        let raw = match tokio::fs::read_to_string(&job.marker).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {:?}", job.marker)),
        };
        let exit_code = raw
            .trim()
            .parse::<i32>()
            .with_context(|| format!("malformed exit marker {:?}: {raw:?}", job.marker))?;
        let log_tail = match tokio::fs::read_to_string(&job.log).await {
            Ok(log) => tail_lines(&log, STDERR_TAIL_LINES),
            Err(_) => String::new(),
        };
        Ok(Some(JobStatus::Done { exit_code, log_tail }))
    }
}

impl JobQueue for CommandJobQueue {
    fn submit<'a>(&'a self, spec: &'a JobSpec) -> JobFuture<'a, JobHandle> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.job_dir)
                .await
                .with_context(|| format!("creating job dir {:?}", self.job_dir))?;

            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let stem = format!("{}-{seq}", file_safe(&spec.name));
            let script = self.job_dir.join(format!("{stem}.sh"));
            let log = self.job_dir.join(format!("{stem}.log"));
            let marker = self.job_dir.join(format!("{stem}.exit"));

            for stale in [&log, &marker] {
                let _ = tokio::fs::remove_file(stale).await;
            }
            tokio::fs::write(&script, Self::job_script(spec, &log, &marker))
                .await
                .with_context(|| format!("writing job script {script:?}"))?;

            let submit = self
                .submit
                .replace("{script}", &shell_quote(&script.display().to_string()))
                .replace("{name}", &shell_quote(&spec.name));
            let output = shell_output(&submit, &spec.workdir).await?;
            if !output.status.success() {
                bail!(
                    "submit command {submit:?} failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let id = stdout
                .split_whitespace()
                .last()
                .ok_or_else(|| anyhow!("submit command {submit:?} printed no job id"))?
                .to_string();

            info!(job = %id, name = %spec.name, "submitted cluster job");
            Ok(JobHandle {
                id,
                name: spec.name.clone(),
                marker,
                log,
            })
        })
    }

    fn poll<'a>(&'a self, job: &'a JobHandle) -> JobFuture<'a, JobStatus> {
        Box::pin(async move {
            if let Some(done) = Self::read_done(job).await? {
                return Ok(done);
            }
            let Some(status) = &self.status else {
                return Ok(JobStatus::Pending);
            };

            let cmd = status.replace("{job}", &shell_quote(&job.id));
            let workdir = self.job_dir.parent().unwrap_or(self.job_dir.as_path());
            let output = shell_output(&cmd, workdir).await?;
            if output.status.success() {
                return Ok(JobStatus::Pending);
            }
            // The job may have finished between the two checks.
            Ok(Self::read_done(job).await?.unwrap_or(JobStatus::Vanished))
        })
    }
}

async fn shell_output(cmd: &str, workdir: &Path) -> anyhow::Result<std::process::Output> {
    Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("running {cmd:?}"))
}

/// Submits command lines to a [`JobQueue`] and waits for them.
#[derive(Debug, Clone)]
pub struct ClusterCommandRunner {
    queue: Arc<dyn JobQueue>,
    workdir: PathBuf,
    poll_interval: Duration,
    job_timeout: Option<Duration>,
}

impl ClusterCommandRunner {
    pub fn new(queue: Arc<dyn JobQueue>, workdir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            queue,
            workdir: workdir.into(),
            poll_interval,
            job_timeout: None,
        }
    }

    /// Fail jobs still pending after `timeout`.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }
}

impl CommandRunner for ClusterCommandRunner {
    fn run_command<'a>(&'a self, sched: &'a ScheduledInstance, cmd: String) -> CommandFuture<'a> {
        Box::pin(async move {
            let spec = JobSpec {
                name: sched.instance.id.clone(),
                command: cmd,
                workdir: self.workdir.clone(),
            };
            let job = self
                .queue
                .submit(&spec)
                .await
                .map_err(|e| FailureCause::Spawn(format!("{e:#}")))?;

            let started = tokio::time::Instant::now();
            let mut errors = 0;
            loop {
                tokio::time::sleep(self.poll_interval).await;
                match self.queue.poll(&job).await {
                    Ok(JobStatus::Pending) => {
                        errors = 0;
                        debug!(job = %job.id, instance = %sched.id(), "job pending");
                        if let Some(limit) = self.job_timeout {
                            if started.elapsed() >= limit {
                                warn!(job = %job.id, instance = %sched.id(), "job exceeded its time limit");
                                return Err(FailureCause::JobTimedOut {
                                    job: job.id.clone(),
                                    secs: limit.as_secs(),
                                });
                            }
                        }
                    }
                    Ok(JobStatus::Done { exit_code: 0, .. }) => return Ok(()),
                    Ok(JobStatus::Done { exit_code, log_tail }) => {
                        return Err(FailureCause::ExitStatus {
                            code: Some(exit_code),
                            stderr_tail: log_tail,
                        });
                    }
                    Ok(JobStatus::Vanished) => return Err(FailureCause::JobVanished(job.id.clone())),
                    Err(err) => {
                        errors += 1;
                        let msg = format!("{err:#}");
                        warn!(job = %job.id, error = %msg, attempt = errors, "polling job failed");
                        if errors >= MAX_POLL_ERRORS {
                            return Err(FailureCause::JobVanished(job.id.clone()));
                        }
                    }
                }
            }
        })
    }
}

/// Backend that submits commands to a cluster queue.
#[derive(Debug, Clone)]
pub struct ClusterBackend {
    dispatcher: Dispatcher,
}

impl ClusterBackend {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        queue: Arc<dyn JobQueue>,
        poll_interval: Duration,
        job_timeout: Option<Duration>,
        concurrency: usize,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let runner = Arc::new(
            ClusterCommandRunner::new(queue, fs.root(), poll_interval).with_job_timeout(job_timeout),
        );
        Self {
            dispatcher: Dispatcher::new(fs, runner, concurrency, runtime_tx),
        }
    }

    pub fn from_config(
        fs: Arc<dyn FileSystem>,
        cfg: &ClusterSection,
        concurrency: usize,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let queue = Arc::new(CommandJobQueue::from_config(fs.root(), cfg));
        let interval = Duration::from_millis(cfg.poll_interval_ms.max(1));
        let timeout = cfg.job_timeout_secs.map(Duration::from_secs);
        Self::new(fs, queue, interval, timeout, concurrency, runtime_tx)
    }
}

impl ExecutorBackend for ClusterBackend {
    fn spawn_ready_instances(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for sched in instances {
                self.dispatcher.dispatch(sched);
            }
            Ok(())
        })
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_quotes() {
        assert_eq!(file_safe("align[s1.bam]"), "align_s1.bam_");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(tail_lines("a\nb\nc", 2), "b\nc");
    }

    #[tokio::test]
    async fn synchronous_submit_reports_exit_code_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandJobQueue::new(dir.path().join("jobs"), "sh {script}; echo 4242", None);
        let spec = JobSpec {
            name: "align[s1]".into(),
            command: "echo aligned; exit 3".into(),
            workdir: dir.path().to_path_buf(),
        };

        let job = queue.submit(&spec).await.unwrap();
        assert_eq!(job.id, "4242");

        match queue.poll(&job).await.unwrap() {
            JobStatus::Done { exit_code, log_tail } => {
                assert_eq!(exit_code, 3);
                assert_eq!(log_tail, "aligned");
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn job_unknown_to_the_queue_has_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandJobQueue::new(dir.path().join("jobs"), "echo 77", Some("false".into()));
        let spec = JobSpec {
            name: "trim".into(),
            command: "true".into(),
            workdir: dir.path().to_path_buf(),
        };

        let job = queue.submit(&spec).await.unwrap();
        assert_eq!(queue.poll(&job).await.unwrap(), JobStatus::Vanished);
    }

    /// Accepts every job and never sees it finish.
    #[derive(Debug)]
    struct StuckQueue;

    impl JobQueue for StuckQueue {
        fn submit<'a>(&'a self, spec: &'a JobSpec) -> JobFuture<'a, JobHandle> {
            Box::pin(async move {
                Ok(JobHandle {
                    id: "9001".into(),
                    name: spec.name.clone(),
                    marker: PathBuf::from("never.exit"),
                    log: PathBuf::from("never.log"),
                })
            })
        }

        fn poll<'a>(&'a self, _job: &'a JobHandle) -> JobFuture<'a, JobStatus> {
            Box::pin(async { Ok(JobStatus::Pending) })
        }
    }

    #[tokio::test]
    async fn killed_job_without_status_command_times_out() {
        use crate::config::Params;
        use crate::config::model::{OneOrMany, TaskConfig};
        use crate::dag::TaskInstance;
        use crate::pattern::Captures;
        use crate::task::Task;

        let cfg = TaskConfig {
            output: OneOrMany::One("s1.bam".into()),
            cmd: Some("bowtie2 > {output}".into()),
            ..TaskConfig::default()
        };
        let task = Task::from_config("align", &cfg).unwrap();
        let params = Params::new();
        let instance = TaskInstance::new(
            &task,
            Vec::new(),
            vec![PathBuf::from("s1.bam")],
            Captures::new(),
            Vec::new(),
            &params,
        )
        .unwrap();
        let sched = ScheduledInstance {
            index: 0,
            instance,
            task: Arc::new(task),
            params: Arc::new(params),
        };

        let runner = ClusterCommandRunner::new(Arc::new(StuckQueue), ".", Duration::from_millis(5))
            .with_job_timeout(Some(Duration::from_millis(30)));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run_command(&sched, "bowtie2 > s1.bam".into()),
        )
        .await
        .expect("runner should give up on its own");

        assert!(
            matches!(&result, Err(FailureCause::JobTimedOut { job, .. }) if job == "9001"),
            "unexpected result {result:?}"
        );
    }

    #[tokio::test]
    async fn failing_submit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandJobQueue::new(dir.path().join("jobs"), "exit 1", None);
        let spec = JobSpec {
            name: "trim".into(),
            command: "true".into(),
            workdir: dir.path().to_path_buf(),
        };
        assert!(queue.submit(&spec).await.is_err());
    }
}
