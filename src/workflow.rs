//! The immutable, validated task graph.
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::RunError;
use crate::planner::Planner;
use crate::schema::ParameterType;
use crate::task::TaskNode;

/// Stable identifier of a node within one workflow, rendered `n0`, `n1`, ...
///
/// Ids are unique within their workflow and follow invocation order; two
/// invocations of the same [`TaskNode`] get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn from_index(index: NodeIndex) -> Self {
        NodeId(index.index() as u32)
    }

    pub(crate) fn index(self) -> NodeIndex {
        NodeIndex::new(self.0 as usize)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Where one input (or the workflow sink) takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Binding {
    /// A workflow source, by name.
    Source(String),
    /// An output slot of another node.
    Output(NodeId, usize),
}

/// A task invocation embedded in the graph.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) task: TaskNode,
    /// One binding per declared input, in signature order.
    pub(crate) bindings: IndexMap<String, Binding>,
}

/// Graph edge payload: which producer output feeds which consumer input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EdgeData {
    pub(crate) output: usize,
    pub(crate) input: String,
}

/// Presentation metadata attached to a workflow.
///
/// The engine never interprets any of this; it is carried verbatim into the
/// registration descriptor for UI collaborators to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub display_name: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    /// Display hints per workflow source, keyed by source name
    /// (e.g. `"reads" => "FASTQ file with forward reads"`).
    pub hints: IndexMap<String, String>,
}

/// A validated, immutable task graph, ready to run any number of times.
///
/// Produced by [`WorkflowBuilder::finish`](crate::WorkflowBuilder::finish),
/// which guarantees the graph is acyclic, fully typed and free of orphan
/// nodes. Execution goes through [`planner`](Workflow::planner) for external
/// drivers, or [`Executor`](crate::Executor) for in-process runs.
///
/// The `Display` implementation renders the graph as a
/// [mermaid](https://mermaid.js.org/) flowchart.
#[derive(Debug)]
pub struct Workflow {
    pub(crate) name: String,
    pub(crate) meta: WorkflowMeta,
    pub(crate) graph: DiGraph<Node, EdgeData>,
    pub(crate) sources: IndexMap<String, ParameterType>,
    pub(crate) sink: Binding,
    pub(crate) sink_type: ParameterType,
}

impl Workflow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &WorkflowMeta {
        &self.meta
    }

    /// Declared workflow inputs, in declaration order.
    pub fn sources(&self) -> &IndexMap<String, ParameterType> {
        &self.sources
    }

    /// The type of the workflow's output value.
    pub fn output_type(&self) -> &ParameterType {
        &self.sink_type
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Node ids in invocation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices().map(NodeId::from_index)
    }

    /// The task invoked at `node`.
    pub fn task(&self, node: NodeId) -> Option<&TaskNode> {
        self.graph.node_weight(node.index()).map(|n| &n.task)
    }

    /// A planner over this workflow, for driving execution by hand.
    pub fn planner(&self) -> Planner<'_> {
        Planner::new(self)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, RunError> {
        self.graph
            .node_weight(id.index())
            .ok_or(RunError::UnknownNode { node: id })
    }
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for (position, (name, ty)) in self.sources.iter().enumerate() {
            let label = format!("{name}: {ty}").replace('"', "\\\""); // Simple escape
            let label = label.replace('<', "&lt;").replace('>', "&gt;");
            writeln!(f, "    s{position}([\"{label}\"])")?;
        }

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node.task.name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{name}\"]", NodeId::from_index(index))?;
        }

        writeln!(f, "    Output[Output]")?;

        for index in self.graph.node_indices() {
            let id = NodeId::from_index(index);
            let node = &self.graph[index];
            for binding in node.bindings.values() {
                if let Binding::Source(source) = binding {
                    if let Some(position) = self.sources.get_index_of(source) {
                        writeln!(f, "    s{position} --> {id}")?;
                    }
                }
            }
        }

        for edge in self.graph.raw_edges() {
            let producer = &self.graph[edge.source()];
            let ty = &producer.task.signature().outputs[edge.weight.output];
            let label = ty
                .to_string()
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(
                f,
                "    {} -- \"{label}\" --> {}",
                NodeId::from_index(edge.source()),
                NodeId::from_index(edge.target()),
            )?;
        }

        match &self.sink {
            Binding::Source(source) => {
                if let Some(position) = self.sources.get_index_of(source) {
                    writeln!(f, "    s{position} --> Output")?;
                }
            }
            Binding::Output(node, _) => writeln!(f, "    {node} --> Output")?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn node_ids_render_compactly() {
        assert_eq!(NodeId(0).to_string(), "n0");
        assert_eq!(NodeId(17).to_string(), "n17");
    }
}
