#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use pipedag::config::PipelineFile;
use pipedag::dag::Plan;
use pipedag::engine::{EVENT_CHANNEL_CAPACITY, RunReport, RuntimeEvent};
use pipedag::fs::mock::MockFileSystem;
use pipedag::ledger::{MemoryLedger, RunLedger};
use pipedag::{Pipeline, execute_with};
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};
use pipedag_test_utils::fake_executor::FakeExecutor;
use pipedag_test_utils::with_timeout;

/// `trim -> align -> peakcall`, linked by file patterns only.
pub fn chip_chain() -> PipelineBuilder {
    PipelineBuilder::new()
        .with_task(
            "trim",
            TaskConfigBuilder::new("trim_galore {input} -o {output}")
                .input("*.fastq.gz")
                .suffix(".fastq.gz")
                .output("{basename}.trimmed.fq")
                .build(),
        )
        .with_task(
            "align",
            TaskConfigBuilder::new("bowtie2 -U {input} | samtools sort -o {output}")
                .input("*.trimmed.fq")
                .suffix(".trimmed.fq")
                .output("{basename}.bam")
                .build(),
        )
        .with_task(
            "peakcall",
            TaskConfigBuilder::new("macs2 callpeak -t {input} -n {basename}")
                .input("*.bam")
                .suffix(".bam")
                .output("{basename}.narrowPeak")
                .active_if("peakcaller")
                .build(),
        )
        .with_param("peakcaller", true)
}

pub fn pipeline(file: PipelineFile, fs: &MockFileSystem) -> Pipeline {
    Pipeline::from_file(file, Arc::new(fs.clone()), &[]).expect("pipeline should load")
}

pub fn ids(plan: &Plan) -> Vec<String> {
    plan.instances().iter().map(|i| i.id.clone()).collect()
}

/// Outcome of one invocation against the fake executor.
pub struct FakeRun {
    pub report: RunReport,
    pub dispatched: Vec<String>,
    pub commands: Vec<String>,
}

/// Plan `targets` and run them with a [`FakeExecutor`]; `failing` names
/// tasks or instance ids whose commands fail.
pub async fn run_fake(
    pipeline: &Pipeline,
    fs: &MockFileSystem,
    ledger: Arc<MemoryLedger>,
    targets: &[&str],
    failing: &[&str],
) -> FakeRun {
    let targets: Vec<String> = targets.iter().map(|s| s.to_string()).collect();
    let plan = pipeline.plan(&targets).expect("plan should resolve");

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let mut executor = FakeExecutor::new(fs.clone(), tx);
    for name in failing {
        executor = executor.failing(name);
    }
    let dispatched = executor.dispatched();
    let commands = executor.commands();

    let ledger: Arc<dyn RunLedger> = ledger;
    let report = with_timeout(execute_with(
        plan,
        Arc::new(fs.clone()),
        ledger,
        2,
        rx,
        executor,
    ))
    .await
    .expect("runtime should not error");

    FakeRun {
        report,
        dispatched: dispatched.lock().unwrap().clone(),
        commands: commands.lock().unwrap().clone(),
    }
}
