//! Pure scheduling over a validated workflow.
//!
//! The planner computes which nodes can run and validates what gets
//! recorded, but never executes anything and never touches the filesystem.
//! All run progress lives in a [`RunState`] owned by the caller, so external
//! drivers (remote executors, job queues) can pump the same workflow their
//! own way. [`Executor`](crate::Executor) is the bundled in-process driver.
use indexmap::IndexMap;

use crate::error::RunError;
use crate::value::{Args, Value};
use crate::workflow::{Binding, NodeId, Workflow};

/// Scheduling façade over one workflow. Cheap to create, holds no state.
pub struct Planner<'w> {
    workflow: &'w Workflow,
}

/// Progress of one run: recorded outputs, bound sources, failures.
///
/// Created by [`Planner::start`] and advanced through [`Planner::record`]
/// and [`Planner::record_failure`]. A node is scheduled at most once per
/// state; the planner rejects double records.
#[derive(Debug)]
pub struct RunState {
    pub(crate) sources: IndexMap<String, Value>,
    pub(crate) values: IndexMap<NodeId, Vec<Value>>,
    pub(crate) failures: Vec<NodeFailure>,
}

impl RunState {
    /// Outputs recorded for `node`, if it finished.
    pub fn recorded(&self, node: NodeId) -> Option<&[Value]> {
        self.values.get(&node).map(Vec::as_slice)
    }

    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    fn failed(&self, node: NodeId) -> bool {
        self.failures.iter().any(|failure| failure.node == node)
    }

    fn settled(&self, node: NodeId) -> bool {
        self.values.contains_key(&node) || self.failed(node)
    }
}

/// One task body that returned an error or panicked.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: NodeId,
    pub task: String,
    pub error: anyhow::Error,
}

/// Where a run currently stands.
#[derive(Debug)]
pub enum RunStatus<'a> {
    /// Nodes are still outstanding.
    Pending,
    /// The sink value has been recorded; this is the workflow output.
    Complete(&'a Value),
    /// At least one node failed and the sink can no longer be reached.
    Failed(&'a [NodeFailure]),
}

impl<'w> Planner<'w> {
    pub(crate) fn new(workflow: &'w Workflow) -> Self {
        Self { workflow }
    }

    /// Binds source values and opens a fresh run.
    ///
    /// Every declared source must be bound exactly once, with a value
    /// conforming to its declared type.
    pub fn start(&self, bindings: &[(&str, Value)]) -> Result<RunState, RunError> {
        let mut sources: IndexMap<String, Value> = IndexMap::new();

        for (name, value) in bindings {
            let ty = self
                .workflow
                .sources
                .get(*name)
                .ok_or_else(|| RunError::UnknownSource {
                    name: name.to_string(),
                })?;
            if !value.conforms_to(ty) {
                return Err(RunError::SourceType {
                    name: name.to_string(),
                    expected: ty.clone(),
                    found: value.kind().to_string(),
                });
            }
            if sources.insert(name.to_string(), value.clone()).is_some() {
                return Err(RunError::SourceAlreadyBound {
                    name: name.to_string(),
                });
            }
        }

        for name in self.workflow.sources.keys() {
            if !sources.contains_key(name) {
                return Err(RunError::MissingSource { name: name.clone() });
            }
        }

        Ok(RunState {
            sources,
            values: IndexMap::new(),
            failures: Vec::new(),
        })
    }

    /// Nodes whose dependencies are all recorded and which have not settled
    /// themselves, in invocation order.
    ///
    /// The planner does not track what the driver has already dispatched;
    /// a node stays ready until its outputs (or failure) are recorded.
    pub fn ready(&self, state: &RunState) -> Vec<NodeId> {
        self.workflow
            .node_ids()
            .filter(|id| !state.settled(*id))
            .filter(|id| {
                let node = &self.workflow.graph[id.index()];
                node.bindings.values().all(|binding| match binding {
                    Binding::Source(_) => true,
                    Binding::Output(producer, _) => state.values.contains_key(producer),
                })
            })
            .collect()
    }

    /// Resolves the argument values for `node` from the current state.
    pub fn inputs(&self, state: &RunState, node: NodeId) -> Result<Args, RunError> {
        let target = self.workflow.node(node)?;

        let mut values: IndexMap<String, Value> = IndexMap::new();
        for (input, binding) in &target.bindings {
            let value = match binding {
                Binding::Source(name) => state
                    .sources
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RunError::MissingSource { name: name.clone() })?,
                Binding::Output(producer, index) => state
                    .values
                    .get(producer)
                    .and_then(|outputs| outputs.get(*index))
                    .cloned()
                    .ok_or(RunError::NotReady { node })?,
            };
            values.insert(input.clone(), value);
        }

        Ok(Args::new(values))
    }

    /// Records the outputs a node produced, after checking them against the
    /// task signature (arity, then per-slot type).
    pub fn record(
        &self,
        state: &mut RunState,
        node: NodeId,
        outputs: Vec<Value>,
    ) -> Result<(), RunError> {
        let target = self.workflow.node(node)?;
        if state.settled(node) {
            return Err(RunError::AlreadyRecorded { node });
        }

        let declared = &target.task.signature().outputs;
        if declared.len() != outputs.len() {
            return Err(RunError::OutputArity {
                task: target.task.name().to_string(),
                expected: declared.len(),
                found: outputs.len(),
            });
        }
        for (index, (value, ty)) in outputs.iter().zip(declared).enumerate() {
            if !value.conforms_to(ty) {
                return Err(RunError::OutputType {
                    task: target.task.name().to_string(),
                    index,
                    expected: ty.clone(),
                    found: value.kind().to_string(),
                });
            }
        }

        state.values.insert(node, outputs);
        Ok(())
    }

    /// Records that a node failed. Its dependents will never become ready.
    pub fn record_failure(
        &self,
        state: &mut RunState,
        node: NodeId,
        error: anyhow::Error,
    ) -> Result<(), RunError> {
        let target = self.workflow.node(node)?;
        if state.settled(node) {
            return Err(RunError::AlreadyRecorded { node });
        }

        state.failures.push(NodeFailure {
            node,
            task: target.task.name().to_string(),
            error,
        });
        Ok(())
    }

    /// Whether the sink value has been recorded.
    pub fn is_complete(&self, state: &RunState) -> bool {
        self.sink_value(state).is_some()
    }

    /// The run outcome. A recorded sink wins over unrelated failures.
    pub fn outcome<'s>(&self, state: &'s RunState) -> RunStatus<'s> {
        if let Some(value) = self.sink_value(state) {
            return RunStatus::Complete(value);
        }
        if !state.failures.is_empty() {
            return RunStatus::Failed(&state.failures);
        }
        RunStatus::Pending
    }

    fn sink_value<'s>(&self, state: &'s RunState) -> Option<&'s Value> {
        match &self.workflow.sink {
            Binding::Source(name) => state.sources.get(name),
            Binding::Output(node, index) => state
                .values
                .get(node)
                .and_then(|outputs| outputs.get(*index)),
        }
    }
}
