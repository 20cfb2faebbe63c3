// tests/local_backend.rs
//
// End-to-end runs against a real directory with `sh -c` commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pipedag::dag::InstanceState;
use pipedag::errors::{EXIT_OK, EXIT_TASKS_FAILED};
use pipedag::fs::RealFileSystem;
use pipedag::types::{BackendKind, LedgerStorage};
use pipedag::{Pipeline, RunOptions, execute};
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};
use pipedag_test_utils::{init_tracing, with_timeout};

fn upper_then_count() -> PipelineBuilder {
    PipelineBuilder::new()
        .with_task(
            "upper",
            TaskConfigBuilder::new("tr a-z A-Z < {input} > {output}")
                .input("*.txt")
                .suffix(".txt")
                .output("{basename}.upper")
                .build(),
        )
        .with_task(
            "count",
            TaskConfigBuilder::new("cat {input} | wc -l > {output}")
                .kind(pipedag::task::TaskKind::Merge)
                .input("*.upper")
                .output("lines.count")
                .build(),
        )
}

fn opts(backend: BackendKind) -> RunOptions {
    RunOptions {
        concurrency: 2,
        backend,
        ledger: LedgerStorage::File,
    }
}

fn load(dir: &Path, builder: PipelineBuilder) -> Pipeline {
    Pipeline::from_file(builder.build(), Arc::new(RealFileSystem::new(dir)), &[])
        .expect("pipeline should load")
}

#[tokio::test]
async fn commands_run_in_the_pipeline_root_and_rerun_is_a_noop() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\nchr2\n").unwrap();
    fs::write(dir.path().join("s2.txt"), "chrx\n").unwrap();

    let p = load(dir.path(), upper_then_count());
    let plan = p.plan(&["count".to_string()]).unwrap();
    let report = with_timeout(execute(&p, plan, &opts(BackendKind::Local)))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), EXIT_OK, "{report}");
    assert_eq!(report.succeeded().len(), 3);
    assert_eq!(fs::read_to_string(dir.path().join("s1.upper")).unwrap(), "CHR1\nCHR2\n");
    assert_eq!(fs::read_to_string(dir.path().join("lines.count")).unwrap().trim(), "3");
    assert!(!dir.path().join(".s1.upper.pipedag-tmp").exists());
    assert!(dir.path().join(".pipedag/ledger.jsonl").is_file());

    let plan = p.plan(&["count".to_string()]).unwrap();
    let report = with_timeout(execute(&p, plan, &opts(BackendKind::Local)))
        .await
        .unwrap();
    assert_eq!(report.up_to_date().len(), 3, "{report}");
    assert!(report.succeeded().is_empty());
}

#[tokio::test]
async fn failed_command_leaves_no_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\n").unwrap();

    let builder = PipelineBuilder::new().with_task(
        "upper",
        TaskConfigBuilder::new("echo partial > {output}; echo 'bad index' >&2; exit 3")
            .input("*.txt")
            .suffix(".txt")
            .output("{basename}.upper")
            .build(),
    );
    let p = load(dir.path(), builder);
    let plan = p.plan(&[]).unwrap();
    let report = with_timeout(execute(&p, plan, &opts(BackendKind::Local)))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), EXIT_TASKS_FAILED);
    let failed = report.failed();
    assert_eq!(failed.len(), 1);
    let cause = failed[0].cause.clone().unwrap_or_default();
    assert!(cause.contains("bad index"), "cause was {cause:?}");
    assert!(!dir.path().join("s1.upper").exists());
    assert!(!dir.path().join(".s1.upper.pipedag-tmp").exists());
}

#[tokio::test]
async fn command_that_skips_its_output_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\n").unwrap();

    let builder = PipelineBuilder::new().with_task(
        "upper",
        TaskConfigBuilder::new("true")
            .input("*.txt")
            .suffix(".txt")
            .output("{basename}.upper")
            .build(),
    );
    let p = load(dir.path(), builder);
    let plan = p.plan(&[]).unwrap();
    let report = with_timeout(execute(&p, plan, &opts(BackendKind::Local)))
        .await
        .unwrap();

    assert_eq!(report.instances[0].state, InstanceState::Failed);
    let cause = report.instances[0].cause.clone().unwrap_or_default();
    assert!(cause.contains("s1.upper"), "cause was {cause:?}");
}

#[tokio::test]
async fn unstaged_tasks_write_their_final_paths_directly() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\n").unwrap();

    // The tool picks its own output name, so `{output}` is never used.
    let builder = PipelineBuilder::new().with_task(
        "upper",
        TaskConfigBuilder::new("tr a-z A-Z < {input} > {basename}.upper")
            .input("*.txt")
            .suffix(".txt")
            .output("{basename}.upper")
            .no_staging()
            .build(),
    );
    let p = load(dir.path(), builder);
    let plan = p.plan(&[]).unwrap();
    let report = with_timeout(execute(&p, plan, &opts(BackendKind::Local)))
        .await
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(fs::read_to_string(dir.path().join("s1.upper")).unwrap(), "CHR1\n");
}

#[tokio::test]
async fn cluster_backend_runs_jobs_through_the_submit_command() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\n").unwrap();

    // The "scheduler" runs the job script synchronously and prints a job id.
    let builder = upper_then_count().with_cluster("sh {script} >/dev/null 2>&1; echo 1", None);
    let p = load(dir.path(), builder);
    let plan = p.plan(&["count".to_string()]).unwrap();
    let report = with_timeout(execute(&p, plan, &opts(BackendKind::Cluster)))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), EXIT_OK, "{report}");
    assert_eq!(fs::read_to_string(dir.path().join("s1.upper")).unwrap(), "CHR1\n");
    assert!(dir.path().join("lines.count").is_file());
}

#[tokio::test]
async fn cluster_backend_requires_a_cluster_section() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\n").unwrap();

    let p = load(dir.path(), upper_then_count());
    let plan = p.plan(&[]).unwrap();
    let err = execute(&p, plan, &opts(BackendKind::Cluster)).await.unwrap_err();
    assert!(err.to_string().contains("[cluster]"));
}

#[tokio::test]
async fn run_command_reports_failures_as_an_error() {
    use pipedag::cli::{CliArgs, Command};
    use pipedag::errors::PipedagError;

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("s1.txt"), "chr1\n").unwrap();
    fs::write(
        dir.path().join("Pipeline.toml"),
        r#"
[pipeline]
ledger = "memory"

[task.upper]
input = "*.txt"
suffix = ".txt"
output = "{basename}.upper"
cmd = "exit 1"

[task.count]
kind = "merge"
input = "*.upper"
output = "lines.count"
cmd = "wc -l {input} > {output}"
"#,
    )
    .unwrap();

    let args = CliArgs {
        pipeline: dir.path().join("Pipeline.toml").display().to_string(),
        log_level: None,
        params: Vec::new(),
        command: Command::Run {
            targets: vec!["count".to_string()],
            concurrency: Some(1),
            backend: None,
            ledger: None,
        },
    };

    let err = with_timeout(pipedag::run(args)).await.unwrap_err();
    assert!(
        matches!(err, PipedagError::WorkUnitFailure { failed: 1, blocked: 1 }),
        "unexpected error {err:?}"
    );
    assert_eq!(err.exit_code(), EXIT_TASKS_FAILED);
}
