use camino::Utf8PathBuf;
use thiserror::Error;

use crate::schema::ParameterType;
use crate::workflow::NodeId;

/// A single edge whose producer and consumer disagree about the payload type.
///
/// Mismatches are detected while the workflow is assembled, before any task
/// body runs. `producer` and `consumer` are human-readable descriptions of
/// the two ends, e.g. `"task 'align' (output 0)"` and `"task 'sort'
/// (input 'bam')"`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub producer: String,
    pub consumer: String,
    pub expected: ParameterType,
    pub found: ParameterType,
}

impl std::fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} yields {}, but {} expects {}",
            self.producer, self.found, self.consumer, self.expected
        )
    }
}

/// Every type violation found in one validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatches(pub Vec<TypeMismatch>);

impl std::fmt::Display for TypeMismatches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} type error(s) in workflow:", self.0.len())?;
        for mismatch in &self.0 {
            write!(f, "\n  - {mismatch}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TypeMismatches {}

/// Errors raised while a workflow graph is being assembled or validated.
///
/// All of these are programming errors in the composition itself; none of
/// them can occur once `finish()` has returned a [`Workflow`].
///
/// [`Workflow`]: crate::Workflow
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("workflow has no sink; call sink() before finish()")]
    UnboundSink,

    #[error("sink is already bound")]
    DuplicateSink,

    #[error("cycle detected at task '{task}'")]
    Cycle { task: String },

    #[error("task '{task}' has no input named '{input}'")]
    UnknownInput { task: String, input: String },

    #[error("task '{task}' input '{input}' is not bound")]
    MissingInput { task: String, input: String },

    #[error("task '{task}' input '{input}' is bound more than once")]
    DuplicateInput { task: String, input: String },

    #[error("source '{name}' is already declared")]
    DuplicateSource { name: String },

    #[error("task '{task}' declares no outputs")]
    NoOutputs { task: String },

    #[error("task '{task}' has no output {index}")]
    UnknownOutput { task: String, index: usize },

    #[error("task '{task}' has {outputs} outputs; pick one with output(i)")]
    NotSingleOutput { task: String, outputs: usize },

    #[error("value passed to task '{task}' input '{input}' belongs to a different workflow")]
    ForeignReference { task: String, input: String },

    #[error("sink value belongs to a different workflow")]
    ForeignSink,

    #[error("task '{task}' does not contribute to the workflow output")]
    Unreachable { task: String },

    #[error(transparent)]
    Types(#[from] TypeMismatches),
}

/// Errors raised while materializing or publishing file references.
///
/// These surface inside the owning task execution; the engine never retries
/// them on its own.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to fetch '{uri}':\n{source}")]
    Fetch { uri: String, source: anyhow::Error },

    #[error("failed to publish '{path}' to '{uri}':\n{source}")]
    Publish {
        path: Utf8PathBuf,
        uri: String,
        source: anyhow::Error,
    },

    #[error("reference has neither a local path nor a remote origin")]
    Unresolvable,
}

/// Errors raised while a workflow run is driven through the planner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("workflow has no source named '{name}'")]
    UnknownSource { name: String },

    #[error("source '{name}' is bound more than once")]
    SourceAlreadyBound { name: String },

    #[error("source '{name}' is not bound")]
    MissingSource { name: String },

    #[error("source '{name}' expects {expected}, got {found}")]
    SourceType {
        name: String,
        expected: ParameterType,
        found: String,
    },

    #[error("workflow has no node {node}")]
    UnknownNode { node: NodeId },

    #[error("node {node} is not ready")]
    NotReady { node: NodeId },

    #[error("node {node} already has a result")]
    AlreadyRecorded { node: NodeId },

    #[error("task '{task}' returned {found} outputs, expected {expected}")]
    OutputArity {
        task: String,
        expected: usize,
        found: usize,
    },

    #[error("task '{task}' output {index} expects {expected}, got {found}")]
    OutputType {
        task: String,
        index: usize,
        expected: ParameterType,
        found: String,
    },

    #[error("task '{task}' failed:\n{source}")]
    Task { task: String, source: anyhow::Error },

    #[error("failed to prepare artifact directory:\n{0}")]
    Artifacts(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("run stopped with neither an output nor a failure")]
    Stalled,
}
