// tests/plan_ordering_property.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;

use pipedag::Pipeline;
use pipedag::config::PipelineFile;
use pipedag::fs::mock::MockFileSystem;
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};

/// Random acyclic pipelines: task N may only depend on tasks 0..N-1, via
/// `after` or by consuming their outputs. Each task fans out over a few
/// samples so instance-level edges are exercised too. The second value
/// lists the `after` dependencies of each task.
fn pipeline_strategy(max_tasks: usize) -> impl Strategy<Value = (PipelineFile, Vec<Vec<usize>>)> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), num_tasks),
            proptest::collection::vec(any::<bool>(), num_tasks),
        )
            .prop_map(move |(raw_deps, consume)| {
                let mut builder = PipelineBuilder::new();
                let mut deps_of = Vec::with_capacity(num_tasks);

                for (i, potential) in raw_deps.into_iter().enumerate() {
                    let deps: BTreeSet<usize> = if i == 0 {
                        BTreeSet::new()
                    } else {
                        potential.into_iter().map(|d| d % i).collect()
                    };

                    let name = format!("task_{i}");
                    let mut task = if i > 0 && consume[i] {
                        let source = *deps.iter().next().unwrap_or(&(i - 1));
                        TaskConfigBuilder::new("step {input} {output}")
                            .input(&format!("*.t{source}"))
                            .suffix(&format!(".t{source}"))
                            .output(&format!("{{basename}}.t{i}"))
                    } else {
                        TaskConfigBuilder::new("seed {input} {output}")
                            .input("*.raw")
                            .suffix(".raw")
                            .output(&format!("{{basename}}.t{i}"))
                    };
                    for d in &deps {
                        task = task.after(&format!("task_{d}"));
                    }
                    builder = builder.with_task(&name, task.build());

                    deps_of.push(deps.into_iter().collect());
                }
                (builder.build(), deps_of)
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_instance_comes_after_its_dependencies(
        (file, deps_of) in pipeline_strategy(8),
        samples in 1usize..4,
    ) {
        let fs = MockFileSystem::new();
        for s in 0..samples {
            fs.add_file(format!("s{s}.raw"), "");
        }
        let pipeline = Pipeline::from_file(file, Arc::new(fs.clone()), &[]).unwrap();
        let plan = pipeline.plan(&[]).unwrap();

        for idx in 0..plan.len() {
            for &dep in plan.graph().dependencies_of(idx) {
                prop_assert!(dep < idx, "instance {idx} scheduled before its dependency {dep}");
            }
        }

        let mut first_of: HashMap<&str, usize> = HashMap::new();
        let mut last_of: HashMap<&str, usize> = HashMap::new();
        for (idx, inst) in plan.instances().iter().enumerate() {
            first_of.entry(inst.task.as_str()).or_insert(idx);
            last_of.insert(inst.task.as_str(), idx);
        }
        // `after` orders whole tasks, not just matching instances.
        for (i, deps) in deps_of.iter().enumerate() {
            let name = format!("task_{i}");
            let Some(&first) = first_of.get(name.as_str()) else { continue };
            for d in deps {
                let dep = format!("task_{d}");
                if let Some(&last_dep) = last_of.get(dep.as_str()) {
                    prop_assert!(last_dep < first, "{dep} must finish before {name} starts");
                }
            }
        }
    }
}
