//! Explicit workflow composition.
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use petgraph::graph::DiGraph;
use petgraph::visit::{Dfs, Reversed};

use crate::error::{GraphError, TypeMismatch, TypeMismatches};
use crate::schema::ParameterType;
use crate::task::TaskNode;
use crate::workflow::{Binding, EdgeData, Node, NodeId, Workflow, WorkflowMeta};

/// Distinguishes handles minted by different builders, so a reference can
/// never be smuggled from one workflow into another.
static NEXT_BUILDER: AtomicU64 = AtomicU64::new(0);

/// A handle to a value flowing through the workflow under construction:
/// either a declared source or one output slot of an invoked task.
///
/// Handles are plain copyable tokens. They are only meaningful to the
/// builder that minted them; using one with a different builder is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    builder: u64,
    origin: RefOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefOrigin {
    Source(u32),
    Output(NodeId, u32),
}

/// One invoked node, handing out references to its output slots.
#[derive(Debug, Clone)]
pub struct Invocation {
    builder: u64,
    node: NodeId,
    task: String,
    outputs: u32,
}

impl Invocation {
    /// The id this invocation was assigned in the graph.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// A reference to the output slot at `index`.
    pub fn output(&self, index: usize) -> Result<ValueRef, GraphError> {
        if index >= self.outputs as usize {
            return Err(GraphError::UnknownOutput {
                task: self.task.clone(),
                index,
            });
        }
        Ok(ValueRef {
            builder: self.builder,
            origin: RefOrigin::Output(self.node, index as u32),
        })
    }

    /// The single output of a one-output task.
    pub fn only(&self) -> Result<ValueRef, GraphError> {
        if self.outputs != 1 {
            return Err(GraphError::NotSingleOutput {
                task: self.task.clone(),
                outputs: self.outputs as usize,
            });
        }
        self.output(0)
    }
}

/// Assembles a [`Workflow`] out of task invocations.
///
/// The builder is explicit about everything: sources are declared up front,
/// tasks are invoked with named argument bindings, and the workflow output
/// is bound with [`sink`](WorkflowBuilder::sink). Structural mistakes
/// (unknown inputs, duplicate bindings, foreign handles) fail immediately at
/// the call that makes them; type errors across all edges are collected in
/// one pass by [`finish`](WorkflowBuilder::finish). No task body runs until
/// the finished workflow is executed.
///
/// # Example
///
/// ```rust
/// use weft::{Outputs, ParameterType, TaskNode, WorkflowBuilder};
///
/// let double = TaskNode::build("double")
///     .input("x", ParameterType::INT)
///     .output(ParameterType::INT)
///     .run(|_ctx, args| Ok(Outputs::one(args.int("x")? * 2)));
///
/// let mut wf = WorkflowBuilder::new("pipeline");
/// let x = wf.source("x", ParameterType::INT)?;
/// let doubled = wf.invoke(&double, &[("x", x)])?.only()?;
/// wf.sink(doubled)?;
/// let workflow = wf.finish()?;
/// # Ok::<(), weft::GraphError>(())
/// ```
pub struct WorkflowBuilder {
    id: u64,
    name: String,
    meta: WorkflowMeta,
    graph: DiGraph<Node, EdgeData>,
    sources: IndexMap<String, ParameterType>,
    sink: Option<Binding>,
    declared: Option<ParameterType>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_BUILDER.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            meta: WorkflowMeta::default(),
            graph: DiGraph::new(),
            sources: IndexMap::new(),
            sink: None,
            declared: None,
        }
    }

    /// Attaches presentation metadata.
    pub fn meta(&mut self, meta: WorkflowMeta) -> &mut Self {
        self.meta = meta;
        self
    }

    /// Declares the expected type of the workflow output, checked against
    /// the sink binding at [`finish`](WorkflowBuilder::finish).
    pub fn returns(&mut self, ty: ParameterType) -> &mut Self {
        self.declared = Some(ty);
        self
    }

    /// Declares a workflow input and returns a handle to its future value.
    pub fn source(
        &mut self,
        name: impl Into<String>,
        ty: ParameterType,
    ) -> Result<ValueRef, GraphError> {
        let name = name.into();
        if self.sources.contains_key(&name) {
            return Err(GraphError::DuplicateSource { name });
        }

        let index = self.sources.len() as u32;
        self.sources.insert(name, ty);

        Ok(ValueRef {
            builder: self.id,
            origin: RefOrigin::Source(index),
        })
    }

    /// Adds one invocation of `task` to the graph, binding every declared
    /// input by name.
    ///
    /// Fails fast on structural mistakes: a name the signature does not
    /// declare, an input bound twice, an input left unbound, or a handle
    /// minted by another builder. The same task may be invoked any number
    /// of times; each call gets a fresh node id. Feeding one output to many
    /// consumers is fine; feeding one input from many producers is not.
    pub fn invoke(
        &mut self,
        task: &TaskNode,
        args: &[(&str, ValueRef)],
    ) -> Result<Invocation, GraphError> {
        if task.signature().outputs.is_empty() {
            return Err(GraphError::NoOutputs {
                task: task.name().to_string(),
            });
        }

        let mut bindings: IndexMap<String, Binding> = IndexMap::new();
        let mut edges: Vec<(NodeId, usize, String)> = Vec::new();

        for (input, value) in args {
            if value.builder != self.id {
                return Err(GraphError::ForeignReference {
                    task: task.name().to_string(),
                    input: input.to_string(),
                });
            }
            if !task.signature().inputs.contains_key(*input) {
                return Err(GraphError::UnknownInput {
                    task: task.name().to_string(),
                    input: input.to_string(),
                });
            }

            let binding = match value.origin {
                RefOrigin::Source(index) => {
                    let name = self
                        .sources
                        .get_index(index as usize)
                        .map(|(name, _)| name.clone())
                        .ok_or_else(|| GraphError::ForeignReference {
                            task: task.name().to_string(),
                            input: input.to_string(),
                        })?;
                    Binding::Source(name)
                }
                RefOrigin::Output(node, output) => {
                    edges.push((node, output as usize, input.to_string()));
                    Binding::Output(node, output as usize)
                }
            };

            if bindings.insert(input.to_string(), binding).is_some() {
                return Err(GraphError::DuplicateInput {
                    task: task.name().to_string(),
                    input: input.to_string(),
                });
            }
        }

        for input in task.signature().inputs.keys() {
            if !bindings.contains_key(input) {
                return Err(GraphError::MissingInput {
                    task: task.name().to_string(),
                    input: input.clone(),
                });
            }
        }

        let outputs = task.signature().outputs.len() as u32;
        let index = self.graph.add_node(Node {
            task: task.clone(),
            bindings,
        });
        for (producer, output, input) in edges {
            self.graph
                .add_edge(producer.index(), index, EdgeData { output, input });
        }

        Ok(Invocation {
            builder: self.id,
            node: NodeId::from_index(index),
            task: task.name().to_string(),
            outputs,
        })
    }

    /// Binds the workflow output.
    pub fn sink(&mut self, value: ValueRef) -> Result<(), GraphError> {
        if value.builder != self.id {
            return Err(GraphError::ForeignSink);
        }
        if self.sink.is_some() {
            return Err(GraphError::DuplicateSink);
        }

        let binding = match value.origin {
            RefOrigin::Source(index) => {
                let name = self
                    .sources
                    .get_index(index as usize)
                    .map(|(name, _)| name.clone())
                    .ok_or(GraphError::ForeignSink)?;
                Binding::Source(name)
            }
            RefOrigin::Output(node, output) => Binding::Output(node, output as usize),
        };

        self.sink = Some(binding);
        Ok(())
    }

    /// Validates the composition and freezes it into a [`Workflow`].
    ///
    /// Checks run in this order: the sink must be bound; the graph must be
    /// acyclic; every edge, source binding and the sink itself must
    /// typecheck (all violations are collected into one
    /// [`TypeMismatches`]); and every node must be an ancestor of the sink
    /// binding, since a node whose results can never reach the output is a
    /// composition bug.
    pub fn finish(self) -> Result<Workflow, GraphError> {
        let sink = match &self.sink {
            Some(binding) => binding.clone(),
            None => return Err(GraphError::UnboundSink),
        };

        petgraph::algo::toposort(&self.graph, None).map_err(|cycle| GraphError::Cycle {
            task: self.graph[cycle.node_id()].task.name().to_string(),
        })?;

        let mut mismatches = Vec::new();
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            for (input, binding) in &node.bindings {
                let expected = &node.task.signature().inputs[input.as_str()];
                let found = self.binding_type(binding);
                if !expected.accepts(found) {
                    mismatches.push(TypeMismatch {
                        producer: self.describe(binding),
                        consumer: format!("task '{}' (input '{}')", node.task.name(), input),
                        expected: expected.clone(),
                        found: found.clone(),
                    });
                }
            }
        }

        let sink_type = self.binding_type(&sink).clone();
        if let Some(declared) = &self.declared {
            if !declared.accepts(&sink_type) {
                mismatches.push(TypeMismatch {
                    producer: self.describe(&sink),
                    consumer: "workflow output".to_string(),
                    expected: declared.clone(),
                    found: sink_type.clone(),
                });
            }
        }

        if !mismatches.is_empty() {
            return Err(GraphError::Types(TypeMismatches(mismatches)));
        }

        let mut reachable = vec![false; self.graph.node_count()];
        if let Binding::Output(node, _) = &sink {
            let reversed = Reversed(&self.graph);
            let mut dfs = Dfs::new(reversed, node.index());
            while let Some(index) = dfs.next(reversed) {
                reachable[index.index()] = true;
            }
        }
        for index in self.graph.node_indices() {
            if !reachable[index.index()] {
                return Err(GraphError::Unreachable {
                    task: self.graph[index].task.name().to_string(),
                });
            }
        }

        Ok(Workflow {
            name: self.name,
            meta: self.meta,
            graph: self.graph,
            sources: self.sources,
            sink,
            sink_type,
        })
    }

    fn binding_type(&self, binding: &Binding) -> &ParameterType {
        match binding {
            Binding::Source(name) => &self.sources[name.as_str()],
            Binding::Output(node, index) => {
                &self.graph[node.index()].task.signature().outputs[*index]
            }
        }
    }

    fn describe(&self, binding: &Binding) -> String {
        match binding {
            Binding::Source(name) => format!("source '{name}'"),
            Binding::Output(node, index) => {
                let task = self.graph[node.index()].task.name();
                format!("task '{task}' (output {index})")
            }
        }
    }
}
