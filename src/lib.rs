#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod builder;
mod descriptor;
mod error;
mod executor;
mod fileref;
mod planner;
mod schema;
mod storage;
mod task;
mod utils;
mod value;
mod workflow;

pub use crate::builder::{Invocation, ValueRef, WorkflowBuilder};
pub use crate::descriptor::{EdgeDescriptor, NodeDescriptor, SinkDescriptor, WorkflowDescriptor};
pub use crate::error::*;
pub use crate::executor::{Executor, RunReport, TaskExecution};
pub use crate::fileref::FileRef;
pub use crate::planner::{NodeFailure, Planner, RunState, RunStatus};
pub use crate::schema::{ParameterType, Primitive, Signature};
pub use crate::storage::{FsStorage, Storage};
pub use crate::task::{Amount, ResourceProfile, TaskBuilder, TaskContext, TaskNode, Tier};
pub use crate::value::{Args, Outputs, Value};
pub use crate::workflow::{NodeId, Workflow, WorkflowMeta};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
