// tests/config_errors.rs

use std::io::Write;

use tempfile::NamedTempFile;

use pipedag::config::load_and_validate;
use pipedag::errors::{EXIT_INVALID_GRAPH, PipedagError};

fn write_pipeline(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn explicit_cycle_returns_structured_error() {
    let file = write_pipeline(
        r#"
[task.trim]
cmd = "trim"
after = ["align"]

[task.align]
cmd = "align"
after = ["trim"]
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    match &err {
        PipedagError::CyclicDependency(path) => {
            assert!(path.contains(&"trim".to_string()));
            assert!(path.contains(&"align".to_string()));
            assert_eq!(path.first(), path.last());
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
    assert_eq!(err.exit_code(), EXIT_INVALID_GRAPH);
}

#[test]
fn unknown_task_input_is_rejected() {
    let file = write_pipeline(
        r#"
[task.peakcall]
input = { task = "align" }
output = "{basename}.narrowPeak"
cmd = "macs2 callpeak -t {input}"
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.to_string().contains("align"), "unexpected error: {err}");
    assert_eq!(err.exit_code(), EXIT_INVALID_GRAPH);
}

#[test]
fn malformed_toml_is_a_config_error() {
    let file = write_pipeline("[task.trim\ncmd = ");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, PipedagError::TomlError(_)));
    assert_eq!(err.exit_code(), EXIT_INVALID_GRAPH);
}

#[test]
fn unclosed_placeholder_in_command_is_rejected() {
    let file = write_pipeline(
        r#"
[task.trim]
input = "*.fastq.gz"
output = "{basename}.trimmed.fq"
cmd = "trim {input} -o {output"
"#,
    );
    assert!(load_and_validate(file.path()).is_err());
}

#[test]
fn missing_pipeline_file_is_an_io_error() {
    let err = load_and_validate("/nonexistent/pipedag/Pipeline.toml").unwrap_err();
    assert!(matches!(err, PipedagError::IoError(_)));
    assert_eq!(err.exit_code(), pipedag::errors::EXIT_OTHER);
}

#[test]
fn full_example_pipeline_validates() {
    let file = write_pipeline(
        r#"
[pipeline]
concurrency = 2
default_target = "full"

[params]
homer = true
homer_style = "factor"

[design]
path = "design.tsv"
key_column = "bamReads"

[task.trim]
input = "*.fastq.gz"
suffix = ".fastq.gz"
output = "{basename}.trimmed.fq"
cmd = "trim_galore {input} -o {output}"

[task.align]
input = "*.trimmed.fq"
suffix = ".trimmed.fq"
output = "{basename}.bam"
cmd = "bowtie2 -U {input} | samtools sort -o {output}"

[task.homer_peaks]
input = { design = "bamReads" }
suffix = ".bam"
extra_inputs = ["{design:bamControl}"]
output = "homer/{basename}.peaks.txt"
mkdir = ["homer"]
active_if = ["homer", "homer_style == factor"]
cmd = "findPeaks {input:0} -i {input:1} -style {param:homer_style} -o {output}"

[task.full]
after = ["align", "homer_peaks"]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(
        cfg.task.keys().cloned().collect::<Vec<_>>(),
        vec!["trim", "align", "homer_peaks", "full"]
    );
}
