// src/config/skeleton.rs

//! The annotated starting pipeline printed by `pipedag config`.

const SKELETON: &str = r#"# Pipeline.toml

[pipeline]
concurrency = 4
# backend = "cluster"            # "local" (default) or "cluster"
# ledger = "file"                # "file" (default) or "memory"
# ledger_path = ".pipedag/ledger.jsonl"
default_target = "full"

[params]
# Enable flags and opaque values, overridable with --param key=value.
peakcaller = true
threads = 4

# [design]
# path = "design.tsv"
# key_column = "bamReads"

# [cluster]
# submit = "sbatch --parsable -J {name} {script}"
# status = "squeue -h -j {job}"
# poll_interval_ms = 5000
# job_timeout_secs = 86400     # fail jobs that never report an exit

[task.trim]
input = "*.fastq.gz"
suffix = ".fastq.gz"
output = "{basename}.trimmed.fastq.gz"
cmd = "trim_galore --cores {param:threads} {input} -o {output}"

[task.align]
input = "*.trimmed.fastq.gz"
suffix = ".trimmed.fastq.gz"
output = "{basename}.bam"
cmd = "bowtie2 -p {param:threads} -U {input} | samtools sort -o {output}"

[task.peakcall]
input = "*.bam"
regex = '(?P<sample>[^/]+)\.bam$'
output = "peaks.dir/{sample}.narrowPeak"
mkdir = ["peaks.dir"]
active_if = "peakcaller"
cmd = "macs2 callpeak -t {input} -n {sample} --outdir peaks.dir"
stage_outputs = false

[task.full]
after = ["peakcall"]
"#;

/// Annotated example pipeline file.
pub fn default_skeleton() -> &'static str {
    SKELETON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;
    use crate::config::model::PipelineFile;

    #[test]
    fn skeleton_is_a_valid_pipeline() {
        let raw = load_from_str(default_skeleton()).unwrap();
        let cfg = PipelineFile::try_from(raw).unwrap();
        assert_eq!(cfg.task.len(), 4);
        assert_eq!(cfg.pipeline.default_target.as_deref(), Some("full"));
    }
}
