//! Task declarations: signatures, resource profiles and opaque bodies.
use std::fmt::Debug;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::FileError;
use crate::fileref::FileRef;
use crate::schema::{ParameterType, Signature};
use crate::storage::Storage;
use crate::value::{Args, Outputs};

/// Size class for a resource dimension. Tiers are declarative; the hosting
/// scheduler decides what "large" means on its hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Small,
    Medium,
    Large,
}

/// A requested quantity: either a named tier or an exact amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amount {
    Tier(Tier),
    Exact(u64),
}

/// What a task asks the scheduler for. Pure metadata: nothing in this crate
/// enforces it, the external environment collaborator does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub cpu: Amount,
    /// Memory in MiB when exact.
    pub memory: Amount,
    pub gpu: Amount,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            cpu: Amount::Tier(Tier::Small),
            memory: Amount::Tier(Tier::Small),
            gpu: Amount::Exact(0),
        }
    }
}

impl ResourceProfile {
    /// The default profile: small CPU and memory, no GPU.
    pub fn small() -> Self {
        Self::default()
    }

    pub fn large() -> Self {
        Self {
            cpu: Amount::Tier(Tier::Large),
            memory: Amount::Tier(Tier::Large),
            gpu: Amount::Exact(0),
        }
    }

    /// A large profile with one GPU attached.
    pub fn gpu() -> Self {
        Self {
            gpu: Amount::Exact(1),
            ..Self::large()
        }
    }

    pub fn exact(cpu: u64, memory_mib: u64, gpu: u64) -> Self {
        Self {
            cpu: Amount::Exact(cpu),
            memory: Amount::Exact(memory_mib),
            gpu: Amount::Exact(gpu),
        }
    }
}

/// What a task body sees of the outside world while it runs.
///
/// The context carries the staging directory this execution may scribble in
/// and the storage collaborator used to materialize remote references. The
/// bundled executor creates one per task; external drivers construct their
/// own with [`TaskContext::new`].
pub struct TaskContext<'a> {
    storage: &'a dyn Storage,
    staging: &'a Utf8Path,
}

impl<'a> TaskContext<'a> {
    pub fn new(storage: &'a dyn Storage, staging: &'a Utf8Path) -> Self {
        Self { storage, staging }
    }

    /// Returns a local path for the referenced data, fetching it into this
    /// task's staging directory on first use. See [`FileRef::materialize`].
    pub fn materialize<'f>(&self, file: &'f FileRef) -> Result<&'f Utf8Path, FileError> {
        file.materialize(self.storage, self.staging)
    }

    /// The staging directory private to this task execution.
    pub fn staging(&self) -> &Utf8Path {
        self.staging
    }

    /// Convenience for placing an output file inside the staging directory.
    pub fn stage_path(&self, name: &str) -> Utf8PathBuf {
        self.staging.join(name)
    }
}

type TaskFn = Arc<dyn Fn(&TaskContext<'_>, Args) -> anyhow::Result<Outputs> + Send + Sync>;

/// An individually executable unit of work: a name, a typed signature, a
/// resource profile and an opaque body.
///
/// Nodes are immutable once built and carry no graph state; wiring them
/// together is the job of [`WorkflowBuilder`](crate::WorkflowBuilder), and
/// one node may be invoked any number of times across any number of
/// workflows.
///
/// # Example
///
/// ```rust
/// use weft::{Outputs, ParameterType, TaskNode};
///
/// let double = TaskNode::build("double")
///     .doc("Doubles an integer.")
///     .input("x", ParameterType::INT)
///     .output(ParameterType::INT)
///     .run(|_ctx, args| Ok(Outputs::one(args.int("x")? * 2)));
///
/// assert_eq!(double.name(), "double");
/// ```
#[derive(Clone)]
pub struct TaskNode {
    name: String,
    doc: Option<String>,
    signature: Signature,
    resources: ResourceProfile,
    body: TaskFn,
}

impl TaskNode {
    /// Starts declaring a task. Finish with [`TaskBuilder::run`].
    pub fn build(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            doc: None,
            inputs: IndexMap::new(),
            outputs: Vec::new(),
            resources: ResourceProfile::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn resources(&self) -> &ResourceProfile {
        &self.resources
    }

    /// Runs the body. Input validation is the caller's job; the planner
    /// checks inputs when it gathers them and outputs when they are
    /// recorded.
    pub fn execute(&self, context: &TaskContext<'_>, args: Args) -> anyhow::Result<Outputs> {
        (self.body)(context, args)
    }
}

impl Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Chainable declaration of a [`TaskNode`].
pub struct TaskBuilder {
    name: String,
    doc: Option<String>,
    inputs: IndexMap<String, ParameterType>,
    outputs: Vec<ParameterType>,
    resources: ResourceProfile,
}

impl TaskBuilder {
    /// Human-readable description, surfaced to presentation collaborators.
    pub fn doc(mut self, text: impl Into<String>) -> Self {
        self.doc = Some(text.into());
        self
    }

    /// Declares a named input. Inputs are wired by name only; declaration
    /// order matters for display, not for binding.
    pub fn input(mut self, name: impl Into<String>, ty: ParameterType) -> Self {
        self.inputs.insert(name.into(), ty);
        self
    }

    /// Declares the next positional output.
    pub fn output(mut self, ty: ParameterType) -> Self {
        self.outputs.push(ty);
        self
    }

    pub fn resources(mut self, resources: ResourceProfile) -> Self {
        self.resources = resources;
        self
    }

    /// Attaches the body and produces the immutable node.
    ///
    /// The body may return anything convertible into [`Outputs`]: an
    /// `Outputs` value, a single scalar, or a tuple of values, one per
    /// declared output.
    pub fn run<F, R>(self, body: F) -> TaskNode
    where
        F: Fn(&TaskContext<'_>, Args) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Outputs>,
    {
        TaskNode {
            name: self.name,
            doc: self.doc,
            signature: Signature {
                inputs: self.inputs,
                outputs: self.outputs,
            },
            resources: self.resources,
            body: Arc::new(move |context, args| body(context, args).map(Into::into)),
        }
    }
}
