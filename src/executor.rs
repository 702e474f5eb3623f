//! Bundled in-process workflow driver.
use std::collections::HashSet;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tempfile::TempDir;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::RunError;
use crate::fileref::FileKind;
use crate::planner::{RunState, RunStatus};
use crate::storage::{Storage, copy_rec};
use crate::task::{TaskContext, TaskNode};
use crate::value::{Args, Value};
use crate::workflow::{NodeId, Workflow};

/// Wall-clock measurements for one node.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunReport {
    /// The workflow output value.
    pub output: Value,
    /// Per-node wall-clock measurements, in completion order.
    pub timings: IndexMap<NodeId, TaskExecution>,
    /// Directory holding the files this run retained.
    pub artifacts: Utf8PathBuf,
}

/// Schedules workflow nodes onto the rayon thread pool.
///
/// Each node body runs in its own throwaway staging directory; files it
/// leaves there are moved into the run's artifact directory before staging
/// vanishes, and references flagged with
/// [`publish_to`](crate::FileRef::publish_to) are pushed to storage. On the
/// first node failure the executor stops dispatching, lets in-flight work
/// drain, and reports the failure.
///
/// Artifacts land under the directory given to
/// [`artifacts`](Executor::artifacts), or under a temporary directory tied
/// to the executor's lifetime when none is set.
///
/// ```rust,no_run
/// use weft::{Executor, FsStorage, Outputs, ParameterType, TaskNode, WorkflowBuilder};
///
/// # fn main() -> anyhow::Result<()> {
/// let double = TaskNode::build("double")
///     .input("x", ParameterType::INT)
///     .output(ParameterType::INT)
///     .run(|_ctx, args| Ok(Outputs::one(args.int("x")? * 2)));
///
/// let mut wf = WorkflowBuilder::new("pipeline");
/// let x = wf.source("x", ParameterType::INT)?;
/// let out = wf.invoke(&double, &[("x", x)])?.only()?;
/// wf.sink(out)?;
/// let workflow = wf.finish()?;
///
/// let mut executor = Executor::new(FsStorage::new("/srv/store"));
/// let report = executor.run(&workflow, &[("x", 5.into())])?;
/// assert_eq!(report.output, weft::Value::Int(10));
/// # Ok(()) }
/// ```
pub struct Executor {
    storage: Arc<dyn Storage>,
    artifacts: Option<Utf8PathBuf>,
    scratch: Option<TempDir>,
    runs: u64,
}

impl Executor {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
            artifacts: None,
            scratch: None,
            runs: 0,
        }
    }

    /// Keeps run artifacts under `dir` instead of a temporary directory.
    pub fn artifacts(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.artifacts = Some(dir.into());
        self
    }

    /// Runs `workflow` to completion with the given source bindings.
    pub fn run(
        &mut self,
        workflow: &Workflow,
        sources: &[(&str, Value)],
    ) -> Result<RunReport, RunError> {
        let started = Instant::now();

        let planner = workflow.planner();
        let mut state = planner.start(sources)?;

        let root = self.artifact_root()?;
        let run_dir = root.join(format!("{}-{}", workflow.name(), self.runs));
        self.runs += 1;
        fs::create_dir_all(&run_dir)?;

        let root_span = tracing::span!(Level::INFO, "running_workflow");
        root_span.pb_set_length(workflow.node_count() as u64);
        root_span.pb_set_style(&crate::utils::style_root());
        root_span.pb_set_message(&format!("Running '{}'", workflow.name()));
        let _enter = root_span.enter();

        let mut timings = IndexMap::new();
        let mut scheduled: HashSet<NodeId> = HashSet::new();
        let mut in_flight = 0usize;
        let mut halt = false;
        let mut verdict: Option<RunError> = None;

        let storage = self.storage.clone();
        let pb_style = crate::utils::style_task();

        rayon::scope(|s| -> Result<(), RunError> {
            // One channel carries results back; rayon distributes the work.
            let (result_sender, result_receiver) =
                channel::<(NodeId, anyhow::Result<Vec<Value>>, Instant, Duration)>();

            // A helper closure to dispatch one node
            let spawn_node = |state: &RunState, node: NodeId| -> Result<(), RunError> {
                let args = planner.inputs(state, node)?;
                let task = workflow.node(node)?.task.clone();
                let node_dir = run_dir.join(node.to_string());

                // Clone variables for the thread
                let sender = result_sender.clone();
                let pb_style = pb_style.clone();
                let storage = storage.clone();

                // Spawn on Rayon pool
                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = task.name());
                    span.pb_set_style(&pb_style);
                    span.pb_set_message(&format!("Running {}", task.name()));
                    let _enter = span.enter();

                    let start = Instant::now();
                    let outputs = execute_node(&task, storage.as_ref(), &node_dir, args);
                    let elapsed = start.elapsed();

                    // Send result back to main thread
                    sender.send((node, outputs, start, elapsed)).unwrap();
                });

                Ok(())
            };

            // Seed nodes whose inputs are already satisfied
            for node in planner.ready(&state) {
                if scheduled.insert(node) {
                    spawn_node(&state, node)?;
                    in_flight += 1;
                }
            }

            // Scheduler loop
            // The main thread sits here while Rayon workers execute nodes.
            while in_flight > 0 {
                let (node, outputs, start, duration) = result_receiver.recv().unwrap();
                in_flight -= 1;
                timings.insert(node, TaskExecution { start, duration });
                root_span.pb_inc(1);

                match outputs {
                    Ok(values) => match planner.record(&mut state, node, values) {
                        Ok(()) if !halt => {
                            for next in planner.ready(&state) {
                                if scheduled.insert(next) {
                                    spawn_node(&state, next)?;
                                    in_flight += 1;
                                }
                            }
                        }
                        Ok(()) => {}
                        Err(error) => {
                            // A body that broke its own signature. Returning
                            // here would drop the receiver under the workers
                            // still running, so stash the error and drain.
                            if verdict.is_none() {
                                verdict = Some(error);
                            }
                            halt = true;
                        }
                    },
                    Err(error) => {
                        // Dispatch nothing new, let in-flight work drain.
                        planner.record_failure(&mut state, node, error)?;
                        halt = true;
                    }
                }
            }

            Ok(())
        })?;

        if let Some(error) = verdict {
            return Err(error);
        }

        if let RunStatus::Complete(value) = planner.outcome(&state) {
            tracing::info!(
                "Workflow '{}' finished {}",
                workflow.name(),
                crate::utils::as_overhead(started),
            );
            return Ok(RunReport {
                output: value.clone(),
                timings,
                artifacts: run_dir,
            });
        }

        if state.failures.is_empty() {
            return Err(RunError::Stalled);
        }
        let failure = state.failures.remove(0);
        Err(RunError::Task {
            task: failure.task,
            source: failure.error,
        })
    }

    fn artifact_root(&mut self) -> Result<Utf8PathBuf, RunError> {
        if let Some(dir) = &self.artifacts {
            fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        if self.scratch.is_none() {
            self.scratch = Some(tempfile::tempdir()?);
        }
        let path = self
            .scratch
            .as_ref()
            .and_then(|dir| Utf8Path::from_path(dir.path()))
            .ok_or_else(|| {
                RunError::Artifacts(anyhow::anyhow!("scratch directory path is not valid UTF-8"))
            })?;
        Ok(path.to_owned())
    }
}

/// Runs one task body inside a throwaway staging directory, then moves any
/// files it left there under `keep` before staging vanishes. References
/// pointing outside staging pass through untouched; references carrying a
/// publish destination are pushed to `storage` last.
fn execute_node(
    task: &TaskNode,
    storage: &dyn Storage,
    keep: &Utf8Path,
    args: Args,
) -> anyhow::Result<Vec<Value>> {
    let scratch = tempfile::tempdir().context("Failed to create staging directory")?;
    let staging = Utf8Path::from_path(scratch.path())
        .context("Staging directory path is not valid UTF-8")?;
    let context = TaskContext::new(storage, staging);

    // We use AssertUnwindSafe because a panicking body only ever owned its
    // arguments, and its staging directory is discarded wholesale.
    let outputs = match catch_unwind(AssertUnwindSafe(|| task.execute(&context, args))) {
        Ok(result) => result?,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            return Err(anyhow::anyhow!(msg));
        }
    };

    let mut kept = 0usize;
    let mut retained = Vec::with_capacity(outputs.len());
    for value in outputs.into_values() {
        let value = value.try_map_files(&mut |file, kind| {
            let staged = file
                .local_path()
                .filter(|path| path.starts_with(staging))
                .map(ToOwned::to_owned);

            let file = match staged {
                Some(path) => {
                    fs::create_dir_all(keep)?;
                    let name = path.file_name().unwrap_or("artifact");
                    let target = keep.join(format!("{kept}-{name}"));
                    kept += 1;
                    match kind {
                        FileKind::File => {
                            fs::copy(&path, &target)?;
                        }
                        FileKind::Dir => copy_rec(&path, &target)?,
                    }
                    file.rehomed(target)
                }
                None => file,
            };

            if file.destination().is_some() {
                file.publish(storage)?;
            }

            Ok(file)
        })?;
        retained.push(value);
    }

    Ok(retained)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::fileref::FileRef;
    use crate::schema::ParameterType;
    use crate::storage::FsStorage;
    use crate::value::Outputs;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()
    }

    #[test]
    fn runs_a_two_step_pipeline() {
        let step1 = TaskNode::build("step1")
            .input("x", ParameterType::INT)
            .output(ParameterType::File)
            .run(|ctx, args| {
                let path = ctx.stage_path("value.txt");
                fs::write(&path, args.int("x")?.to_string())?;
                Ok(Outputs::one(Value::File(FileRef::local(path))))
            });
        let step2 = TaskNode::build("step2")
            .input("data", ParameterType::File)
            .output(ParameterType::INT)
            .run(|ctx, args| {
                let path = ctx.materialize(args.file("data")?)?;
                let parsed = fs::read_to_string(path)?.trim().parse::<i64>()?;
                Ok(Outputs::one(parsed * 2))
            });

        let mut wf = WorkflowBuilder::new("pipeline");
        let x = wf.source("x", ParameterType::INT).unwrap();
        let file = wf.invoke(&step1, &[("x", x)]).unwrap().only().unwrap();
        let out = wf.invoke(&step2, &[("data", file)]).unwrap().only().unwrap();
        wf.sink(out).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let arts = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store))).artifacts(utf8(&arts));
        let report = executor.run(&workflow, &[("x", 5.into())]).unwrap();

        assert_eq!(report.output, Value::Int(10));
        assert_eq!(report.timings.len(), 2);
        assert!(report.artifacts.starts_with(utf8(&arts)));
        // step1's staged file survives under the run directory.
        assert!(report.artifacts.join("n0/0-value.txt").as_std_path().exists());
    }

    #[test]
    fn publishes_only_flagged_outputs() {
        let emit = TaskNode::build("emit")
            .input("x", ParameterType::INT)
            .output(ParameterType::File)
            .output(ParameterType::File)
            .run(|ctx, args| {
                let x = args.int("x")?;
                let private = ctx.stage_path("private.txt");
                fs::write(&private, x.to_string())?;
                let shared = ctx.stage_path("shared.txt");
                fs::write(&shared, x.to_string())?;
                Ok(Outputs::new(vec![
                    Value::File(FileRef::local(private)),
                    Value::File(FileRef::local(shared).publish_to("fs://results/out.txt")),
                ]))
            });

        let mut wf = WorkflowBuilder::new("publish");
        let x = wf.source("x", ParameterType::INT).unwrap();
        let inv = wf.invoke(&emit, &[("x", x)]).unwrap();
        wf.sink(inv.output(0).unwrap()).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store)));
        executor.run(&workflow, &[("x", 3.into())]).unwrap();

        assert_eq!(
            fs::read_to_string(store.path().join("results/out.txt")).unwrap(),
            "3"
        );
        assert!(!store.path().join("private.txt").exists());
    }

    #[test]
    fn failures_stop_the_run() {
        let touched = Arc::new(AtomicUsize::new(0));

        let boom = TaskNode::build("boom")
            .input("x", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, _args| -> anyhow::Result<Outputs> {
                Err(anyhow::anyhow!("exit status 1"))
            });
        let after = {
            let touched = touched.clone();
            TaskNode::build("after")
                .input("value", ParameterType::INT)
                .output(ParameterType::INT)
                .run(move |_ctx, args| {
                    touched.fetch_add(1, Ordering::SeqCst);
                    Ok(Outputs::one(args.int("value")?))
                })
        };

        let mut wf = WorkflowBuilder::new("failing");
        let x = wf.source("x", ParameterType::INT).unwrap();
        let mid = wf.invoke(&boom, &[("x", x)]).unwrap().only().unwrap();
        let out = wf.invoke(&after, &[("value", mid)]).unwrap().only().unwrap();
        wf.sink(out).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store)));
        let err = executor.run(&workflow, &[("x", 1.into())]).unwrap_err();

        match err {
            RunError::Task { task, .. } => assert_eq!(task, "boom"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(touched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panics_are_reported_as_failures() {
        let boom = TaskNode::build("boom")
            .input("x", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, _args| -> anyhow::Result<Outputs> { panic!("kaboom") });

        let mut wf = WorkflowBuilder::new("panicking");
        let x = wf.source("x", ParameterType::INT).unwrap();
        let out = wf.invoke(&boom, &[("x", x)]).unwrap().only().unwrap();
        wf.sink(out).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store)));
        let err = executor.run(&workflow, &[("x", 1.into())]).unwrap_err();

        match err {
            RunError::Task { source, .. } => {
                assert!(source.to_string().contains("Task panicked: kaboom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn misdeclared_outputs_poison_the_run() {
        let liar = TaskNode::build("liar")
            .input("x", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, _args| Ok(Outputs::one("not a number")));

        let mut wf = WorkflowBuilder::new("lying");
        let x = wf.source("x", ParameterType::INT).unwrap();
        let out = wf.invoke(&liar, &[("x", x)]).unwrap().only().unwrap();
        wf.sink(out).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store)));
        let err = executor.run(&workflow, &[("x", 1.into())]).unwrap_err();
        assert!(matches!(err, RunError::OutputType { index: 0, .. }));
    }

    #[test]
    fn remote_sources_are_fetched_on_demand() {
        let store = tempfile::tempdir().unwrap();
        fs::create_dir_all(store.path().join("input")).unwrap();
        fs::write(store.path().join("input/greeting.txt"), "hey").unwrap();

        let read = TaskNode::build("read")
            .input("data", ParameterType::File)
            .output(ParameterType::STR)
            .run(|ctx, args| {
                let path = ctx.materialize(args.file("data")?)?;
                Ok(Outputs::one(fs::read_to_string(path)?))
            });

        let mut wf = WorkflowBuilder::new("fetching");
        let data = wf.source("data", ParameterType::File).unwrap();
        let out = wf.invoke(&read, &[("data", data)]).unwrap().only().unwrap();
        wf.sink(out).unwrap();
        let workflow = wf.finish().unwrap();

        let mut executor = Executor::new(FsStorage::new(utf8(&store)));
        let report = executor
            .run(
                &workflow,
                &[("data", Value::File(FileRef::remote("fs://input/greeting.txt")))],
            )
            .unwrap();

        assert_eq!(report.output, Value::Str("hey".into()));
    }

    #[test]
    fn passthrough_workflows_complete_without_nodes() {
        let mut wf = WorkflowBuilder::new("id");
        let x = wf.source("x", ParameterType::INT).unwrap();
        wf.sink(x).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store)));
        let report = executor.run(&workflow, &[("x", 7.into())]).unwrap();

        assert_eq!(report.output, Value::Int(7));
        assert!(report.timings.is_empty());
    }

    #[test]
    fn diamonds_run_both_branches() {
        let bump = TaskNode::build("bump")
            .input("x", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, args| Ok(Outputs::one(args.int("x")? + 1)));
        let double = TaskNode::build("double")
            .input("value", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, args| Ok(Outputs::one(args.int("value")? * 2)));
        let triple = TaskNode::build("triple")
            .input("value", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, args| Ok(Outputs::one(args.int("value")? * 3)));
        let join = TaskNode::build("join")
            .input("a", ParameterType::INT)
            .input("b", ParameterType::INT)
            .output(ParameterType::INT)
            .run(|_ctx, args| Ok(Outputs::one(args.int("a")? + args.int("b")?)));

        let mut wf = WorkflowBuilder::new("diamond");
        let x = wf.source("x", ParameterType::INT).unwrap();
        let root = wf.invoke(&bump, &[("x", x)]).unwrap().only().unwrap();
        let left = wf.invoke(&double, &[("value", root)]).unwrap().only().unwrap();
        let right = wf.invoke(&triple, &[("value", root)]).unwrap().only().unwrap();
        let sum = wf
            .invoke(&join, &[("a", left), ("b", right)])
            .unwrap()
            .only()
            .unwrap();
        wf.sink(sum).unwrap();
        let workflow = wf.finish().unwrap();

        let store = tempfile::tempdir().unwrap();
        let mut executor = Executor::new(FsStorage::new(utf8(&store)));

        let first = executor.run(&workflow, &[("x", 1.into())]).unwrap();
        assert_eq!(first.output, Value::Int(10));
        assert_eq!(first.timings.len(), 4);

        // Reruns are independent and keep artifacts apart.
        let second = executor.run(&workflow, &[("x", 2.into())]).unwrap();
        assert_eq!(second.output, Value::Int(15));
        assert_ne!(first.artifacts, second.artifacts);
    }
}
