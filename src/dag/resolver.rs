// src/dag/resolver.rs

//! Expansion of registered tasks into an ordered instance plan.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::Params;
use crate::dag::graph::{find_cycle, DagGraph};
use crate::dag::instance::TaskInstance;
use crate::dag::plan::Plan;
use crate::dag::registry::TaskRegistry;
use crate::design::DesignTable;
use crate::engine::TaskName;
use crate::errors::{PipedagError, Result};
use crate::fs::{normalize, FileSystem};
use crate::pattern::{capture_input, compile_glob, expand_glob, Captures, Template};
use crate::task::{InputSpec, Task, TaskKind, WorkUnit};

/// Builds a [`Plan`] from a registry, the filesystem and the run's params.
pub struct GraphResolver<'a> {
    registry: &'a TaskRegistry,
    fs: &'a dyn FileSystem,
    design: Option<&'a DesignTable>,
}

/// Expansion state shared across tasks.
#[derive(Default)]
struct Expansion {
    instances: Vec<TaskInstance>,
    /// Planned output path -> creating instance.
    planned: BTreeMap<PathBuf, usize>,
    by_task: HashMap<TaskName, Vec<usize>>,
    /// `(upstream, downstream)` in creation indices.
    edges: Vec<(usize, usize)>,
}

impl<'a> GraphResolver<'a> {
    pub fn new(registry: &'a TaskRegistry, fs: &'a dyn FileSystem) -> Self {
        Self {
            registry,
            fs,
            design: None,
        }
    }

    pub fn with_design(mut self, design: Option<&'a DesignTable>) -> Self {
        self.design = design;
        self
    }

    /// Resolve `targets` into an ordered plan.
    ///
    /// Inactive tasks are pruned (their `after` edges dropped), the
    /// remaining tasks are expanded in dependency order against the
    /// filesystem plus the planned outputs of earlier instances, and the
    /// instances are ordered topologically with ties broken by task
    /// declaration order, then instance order.
    pub fn plan<S: AsRef<str>>(&self, targets: &[S], params: &Params) -> Result<Plan> {
        let (kept, rejected) = self
            .registry
            .resolve_targets_where(targets, |t| t.predicate.evaluate(params))?;

        for task in &rejected {
            if targets.iter().any(|t| t.as_ref() == task.name) {
                warn!(task = %task.name, "requested target is inactive; nothing to do for it");
            } else {
                info!(task = %task.name, "task inactive; pruned from plan");
            }
        }

        self.registry.check_acyclic(&kept)?;
        let task_order = self.task_order(&kept)?;

        let mut exp = Expansion::default();
        for task in &task_order {
            self.expand_task(task, params, &mut exp)?;
        }

        for target in targets {
            let name = target.as_ref();
            let active = kept.iter().any(|t| t.name == name);
            if active && exp.by_task.get(name).is_none_or(|v| v.is_empty()) {
                return Err(PipedagError::MissingUpstreamArtifact(name.to_string()));
            }
        }

        let plan = self.order(exp, &kept, rejected, targets, params)?;
        info!(
            instances = plan.len(),
            tasks = kept.len(),
            pruned = plan.pruned().len(),
            "resolved plan"
        );
        Ok(plan)
    }

    fn task_order<'t>(&self, kept: &[&'t Task]) -> Result<Vec<&'t Task>> {
        let upstream = self.registry.upstream_map(kept)?;
        let pos: HashMap<&str, usize> = kept
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let mut edges = Vec::new();
        for (i, task) in kept.iter().enumerate() {
            for up in upstream.get(task.name.as_str()).into_iter().flatten() {
                if let Some(&u) = pos.get(up) {
                    edges.push((u, i));
                }
            }
        }

        let graph = DagGraph::from_edges(kept.len(), &edges);
        let order = graph.toposort_by_insertion().map_err(|stuck| {
            PipedagError::CyclicDependency(stuck.iter().map(|&i| kept[i].name.clone()).collect())
        })?;
        Ok(order.into_iter().map(|i| kept[i]).collect())
    }

    fn expand_task(&self, task: &Task, params: &Params, exp: &mut Expansion) -> Result<()> {
        let candidates = self.candidate_inputs(task, exp)?;
        let instances = match task.kind {
            TaskKind::Transform => self.expand_transform(task, candidates, params)?,
            TaskKind::Merge => self.expand_merge(task, candidates, params)?,
            TaskKind::Originate => self.expand_originate(task, params)?,
            TaskKind::Target => {
                let mkdirs = render_paths(&task.mkdir, &Captures::new(), params)?;
                vec![TaskInstance::new(
                    task,
                    Vec::new(),
                    Vec::new(),
                    Captures::new(),
                    mkdirs,
                    params,
                )?]
            }
        };

        debug!(task = %task.name, kind = %task.kind, instances = instances.len(), "expanded task");
        if instances.is_empty() {
            info!(task = %task.name, "no matching inputs; task has zero instances");
        }

        let upstream_tasks: Vec<&TaskName> = task
            .after
            .iter()
            .chain(task.inputs.iter().filter_map(|i| match i {
                InputSpec::Task(name) => Some(name),
                _ => None,
            }))
            .collect();

        let mut created = Vec::with_capacity(instances.len());
        for instance in instances {
            let idx = exp.instances.len();

            for output in &instance.outputs {
                if let Some(&prev) = exp.planned.get(output) {
                    return Err(PipedagError::OutputCollision {
                        path: output.clone(),
                        first: exp.instances[prev].id.clone(),
                        second: instance.id.clone(),
                    });
                }
                if let Some(prev) = created
                    .iter()
                    .find(|&&c: &&usize| exp.instances[c].outputs.contains(output))
                {
                    return Err(PipedagError::OutputCollision {
                        path: output.clone(),
                        first: exp.instances[*prev].id.clone(),
                        second: instance.id.clone(),
                    });
                }
            }

            for input in &instance.inputs {
                if let Some(&producer) = exp.planned.get(input) {
                    exp.edges.push((producer, idx));
                }
            }
            for up in &upstream_tasks {
                for &producer in exp.by_task.get(up.as_str()).into_iter().flatten() {
                    exp.edges.push((producer, idx));
                }
            }

            exp.instances.push(instance);
            created.push(idx);
        }

        for &idx in &created {
            for output in &exp.instances[idx].outputs {
                exp.planned.insert(output.clone(), idx);
            }
        }
        exp.by_task.insert(task.name.clone(), created);
        Ok(())
    }

    /// Input paths for a task, in declaration order, without duplicates.
    fn candidate_inputs(&self, task: &Task, exp: &Expansion) -> Result<Vec<PathBuf>> {
        let mut out: Vec<PathBuf> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut push = |p: PathBuf, out: &mut Vec<PathBuf>| {
            if seen.insert(p.clone()) {
                out.push(p);
            }
        };

        for spec in &task.inputs {
            match spec {
                InputSpec::Glob(pattern) => {
                    let matcher = compile_glob(pattern)?;
                    let mut found: Vec<PathBuf> = expand_glob(self.fs, pattern)?;
                    found.extend(
                        exp.planned
                            .keys()
                            .filter(|p| matcher.is_match(p))
                            .cloned(),
                    );
                    found.sort();
                    found.dedup();
                    for p in found {
                        push(p, &mut out);
                    }
                }
                InputSpec::Task(name) => {
                    for &idx in exp.by_task.get(name.as_str()).into_iter().flatten() {
                        for p in &exp.instances[idx].outputs {
                            push(p.clone(), &mut out);
                        }
                    }
                }
                InputSpec::Design(column) => match self.design {
                    Some(design) => {
                        for value in design.column(column)? {
                            push(normalize(Path::new(&value)), &mut out);
                        }
                    }
                    None => {
                        debug!(task = %task.name, column = %column, "no design table; design input is empty");
                    }
                },
            }
        }
        Ok(out)
    }

    fn expand_transform(
        &self,
        task: &Task,
        candidates: Vec<PathBuf>,
        params: &Params,
    ) -> Result<Vec<TaskInstance>> {
        let design_columns = design_columns(task);
        let mut drafts: Vec<(PathBuf, Captures, Vec<PathBuf>)> = Vec::new();

        for input in candidates {
            let Some(mut captures) =
                capture_input(&input, task.filter.as_ref(), task.suffix.as_deref())
            else {
                continue;
            };
            if !self.add_design_values(task, &input, &design_columns, &mut captures) {
                continue;
            }
            let outputs = render_paths(&task.outputs, &captures, params)?;
            drafts.push((input, captures, outputs));
        }

        // A task never consumes its own outputs (e.g. `*.bam` -> `*.sorted.bam`
        // re-matching its previous results).
        let produced: HashSet<PathBuf> = drafts
            .iter()
            .flat_map(|(_, _, outs)| outs.iter().cloned())
            .collect();

        let mut instances = Vec::new();
        for (input, captures, outputs) in drafts {
            if produced.contains(&input) {
                debug!(task = %task.name, input = %input.display(), "skipping own output");
                continue;
            }
            let mut inputs = vec![input];
            inputs.extend(render_paths(&task.extra_inputs, &captures, params)?);
            let mkdirs = render_paths(&task.mkdir, &captures, params)?;
            instances.push(TaskInstance::new(task, inputs, outputs, captures, mkdirs, params)?);
        }
        Ok(instances)
    }

    fn expand_merge(
        &self,
        task: &Task,
        candidates: Vec<PathBuf>,
        params: &Params,
    ) -> Result<Vec<TaskInstance>> {
        let captures = Captures::new();
        let outputs = render_paths(&task.outputs, &captures, params)?;
        let mut inputs: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|p| !outputs.contains(p))
            .collect();
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        inputs.extend(render_paths(&task.extra_inputs, &captures, params)?);
        let mkdirs = render_paths(&task.mkdir, &captures, params)?;
        Ok(vec![TaskInstance::new(task, inputs, outputs, captures, mkdirs, params)?])
    }

    fn expand_originate(&self, task: &Task, params: &Params) -> Result<Vec<TaskInstance>> {
        let captures = Captures::new();
        let extra = render_paths(&task.extra_inputs, &captures, params)?;
        let mkdirs = render_paths(&task.mkdir, &captures, params)?;
        task.outputs
            .iter()
            .map(|template| {
                let output = render_path(template, &captures, params)?;
                TaskInstance::new(
                    task,
                    extra.clone(),
                    vec![output],
                    captures.clone(),
                    mkdirs.clone(),
                    params,
                )
            })
            .collect()
    }

    /// Store `design:<column>` values for `input`; `false` when a required
    /// value is missing.
    fn add_design_values(
        &self,
        task: &Task,
        input: &Path,
        columns: &[String],
        captures: &mut Captures,
    ) -> bool {
        for column in columns {
            let value = self.design.and_then(|d| d.lookup(input, column));
            match value {
                Some(v) => {
                    captures.insert(format!("design:{column}"), v);
                }
                None => {
                    warn!(
                        task = %task.name,
                        input = %input.display(),
                        column = %column,
                        "no design value for input; skipping"
                    );
                    return false;
                }
            }
        }
        true
    }

    fn order(
        &self,
        exp: Expansion,
        kept: &[&Task],
        rejected: Vec<&Task>,
        targets: &[impl AsRef<str>],
        params: &Params,
    ) -> Result<Plan> {
        let Expansion {
            instances, edges, ..
        } = exp;

        // Creation order follows task dependency order; rank by declaration
        // order then instance order for tie-breaking.
        let mut keyed: Vec<(usize, usize, usize)> = {
            let mut within_task: HashMap<&str, usize> = HashMap::new();
            instances
                .iter()
                .enumerate()
                .map(|(created, inst)| {
                    let decl = self.registry.declaration_index(&inst.task).unwrap_or(usize::MAX);
                    let n = within_task.entry(inst.task.as_str()).or_insert(0);
                    let key = (decl, *n, created);
                    *n += 1;
                    key
                })
                .collect()
        };
        keyed.sort_unstable();

        let mut rank = vec![0usize; instances.len()];
        for (r, &(_, _, created)) in keyed.iter().enumerate() {
            rank[created] = r;
        }
        let ranked_edges: Vec<(usize, usize)> =
            edges.iter().map(|&(u, d)| (rank[u], rank[d])).collect();
        let ranked_graph = DagGraph::from_edges(instances.len(), &ranked_edges);

        let order = match ranked_graph.toposort_by_insertion() {
            Ok(order) => order,
            Err(stuck) => {
                let by_rank: Vec<usize> = keyed.iter().map(|&(_, _, c)| c).collect();
                let names: Vec<&str> = stuck
                    .iter()
                    .map(|&r| instances[by_rank[r]].task.as_str())
                    .collect();
                let stuck_set: HashSet<usize> = stuck.iter().copied().collect();
                let task_edges: Vec<(&str, &str)> = ranked_edges
                    .iter()
                    .filter(|(u, d)| stuck_set.contains(u) && stuck_set.contains(d))
                    .map(|&(u, d)| {
                        (
                            instances[by_rank[u]].task.as_str(),
                            instances[by_rank[d]].task.as_str(),
                        )
                    })
                    .collect();
                let mut unique: Vec<&str> = Vec::new();
                for n in names {
                    if !unique.contains(&n) {
                        unique.push(n);
                    }
                }
                let cycle = find_cycle(&unique, &task_edges).unwrap_or(unique);
                return Err(PipedagError::CyclicDependency(
                    cycle.into_iter().map(str::to_string).collect(),
                ));
            }
        };

        // `order` is in rank space; map to final positions.
        let by_rank: Vec<usize> = keyed.iter().map(|&(_, _, c)| c).collect();
        let mut final_pos = vec![0usize; instances.len()];
        for (pos, &r) in order.iter().enumerate() {
            final_pos[by_rank[r]] = pos;
        }

        let mut slots: Vec<Option<TaskInstance>> = vec![None; instances.len()];
        for (created, inst) in instances.into_iter().enumerate() {
            slots[final_pos[created]] = Some(inst);
        }
        let ordered: Vec<TaskInstance> = slots.into_iter().flatten().collect();
        let final_edges: Vec<(usize, usize)> = edges
            .iter()
            .map(|&(u, d)| (final_pos[u], final_pos[d]))
            .collect();
        let graph = DagGraph::from_edges(ordered.len(), &final_edges);

        let tasks: IndexMap<TaskName, Arc<Task>> = kept
            .iter()
            .map(|t| (t.name.clone(), Arc::new((*t).clone())))
            .collect();
        let pruned = rejected.into_iter().map(|t| t.name.clone()).collect();
        let targets = targets.iter().map(|t| t.as_ref().to_string()).collect();

        Ok(Plan::new(ordered, graph, tasks, pruned, targets, params.clone()))
    }
}

/// Columns named by `{design:<column>}` placeholders anywhere in the task.
fn design_columns(task: &Task) -> Vec<String> {
    let mut templates: Vec<&Template> = task
        .outputs
        .iter()
        .chain(task.extra_inputs.iter())
        .chain(task.mkdir.iter())
        .collect();
    if let WorkUnit::Command(cmd) = &task.work {
        templates.push(cmd);
    }

    let mut columns: Vec<String> = Vec::new();
    for template in templates {
        for key in template.placeholders() {
            if let Some(column) = key.strip_prefix("design:") {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }
    }
    columns
}

fn render_path(template: &Template, captures: &Captures, params: &Params) -> Result<PathBuf> {
    let rendered = template.render(|key| match key.strip_prefix("param:") {
        Some(name) => params.render(name),
        None => captures.get(key).cloned(),
    })?;
    Ok(normalize(Path::new(&rendered)))
}

fn render_paths(templates: &[Template], captures: &Captures, params: &Params) -> Result<Vec<PathBuf>> {
    templates
        .iter()
        .map(|t| render_path(t, captures, params))
        .collect()
}
