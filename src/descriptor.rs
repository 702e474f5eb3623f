//! Serializable workflow snapshots for registration.
use indexmap::IndexMap;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::schema::ParameterType;
use crate::task::ResourceProfile;
use crate::workflow::{Binding, NodeId, Workflow, WorkflowMeta};

/// Plain-data description of a [`Workflow`]: everything an external service
/// needs to display, schedule or audit the graph, and nothing it cannot
/// serialize. Task bodies stay behind; only names, signatures and resource
/// profiles travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    /// Descriptor format version, bumped on breaking layout changes.
    pub format: u32,
    pub name: String,
    pub meta: WorkflowMeta,
    pub sources: IndexMap<String, ParameterType>,
    pub output_type: ParameterType,
    pub nodes: Vec<NodeDescriptor>,
    pub edges: Vec<EdgeDescriptor>,
    pub sink: SinkDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Node id within the workflow, `n0`, `n1`, ...
    pub id: String,
    pub task: String,
    pub doc: Option<String>,
    pub inputs: IndexMap<String, ParameterType>,
    pub outputs: Vec<ParameterType>,
    pub resources: ResourceProfile,
    /// Inputs fed directly by workflow sources: input name to source name.
    pub source_bindings: IndexMap<String, String>,
}

/// One dataflow edge: output slot `output` of node `from` feeds input
/// `input` of node `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub from: String,
    pub output: usize,
    pub to: String,
    pub input: String,
}

/// Where the workflow output comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkDescriptor {
    Source { name: String },
    Output { node: String, output: usize },
}

impl WorkflowDescriptor {
    pub const FORMAT: u32 = 1;

    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Hex BLAKE3 digest of the compact JSON rendering.
    ///
    /// Structurally identical workflows digest identically, so registries
    /// can use this to dedupe registrations and detect drift.
    pub fn digest(&self) -> serde_json::Result<String> {
        let compact = serde_json::to_string(self)?;
        Ok(blake3::hash(compact.as_bytes()).to_hex().to_string())
    }
}

impl Workflow {
    /// Exports the graph structure as a [`WorkflowDescriptor`].
    pub fn descriptor(&self) -> WorkflowDescriptor {
        let nodes = self
            .graph
            .node_indices()
            .map(|index| {
                let node = &self.graph[index];
                let signature = node.task.signature();
                let source_bindings = node
                    .bindings
                    .iter()
                    .filter_map(|(input, binding)| match binding {
                        Binding::Source(name) => Some((input.clone(), name.clone())),
                        Binding::Output(..) => None,
                    })
                    .collect();

                NodeDescriptor {
                    id: NodeId::from_index(index).to_string(),
                    task: node.task.name().to_string(),
                    doc: node.task.doc().map(ToOwned::to_owned),
                    inputs: signature.inputs.clone(),
                    outputs: signature.outputs.clone(),
                    resources: *node.task.resources(),
                    source_bindings,
                }
            })
            .collect();

        let edges = self
            .graph
            .edge_references()
            .map(|edge| EdgeDescriptor {
                from: NodeId::from_index(edge.source()).to_string(),
                output: edge.weight().output,
                to: NodeId::from_index(edge.target()).to_string(),
                input: edge.weight().input.clone(),
            })
            .collect();

        let sink = match &self.sink {
            Binding::Source(name) => SinkDescriptor::Source { name: name.clone() },
            Binding::Output(node, output) => SinkDescriptor::Output {
                node: node.to_string(),
                output: *output,
            },
        };

        WorkflowDescriptor {
            format: WorkflowDescriptor::FORMAT,
            name: self.name.clone(),
            meta: self.meta.clone(),
            sources: self.sources.clone(),
            output_type: self.sink_type.clone(),
            nodes,
            edges,
            sink,
        }
    }
}
