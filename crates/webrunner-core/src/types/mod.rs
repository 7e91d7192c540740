//! Core type definitions for webrunner
//!
//! This module contains the fundamental types used throughout the system:
//! - Action: atomic, schema-validated web command
//! - Step: planned invocation of one Action with its result contract
//! - ExecutionResult: tagged outcome of one provider call
//! - Task: ordered steps pursuing a goal, with an explicit state machine
//! - ProgressEvent: typed observations emitted during execution

mod action;
mod event;
mod result;
mod step;
mod task;

pub use action::{
    Action, ActionError, ActionKind, ClickParams, ContextMap, ExtractAttributeParams,
    ExtractTextParams, FieldShape, NavigateParams, SearchParams, TypeParams, WaitParams,
    WaitUntil,
};
pub use event::{ProgressEvent, ProgressEventKind};
pub use result::{ErrorCategory, ExecutionResult, ResultMeta};
pub use step::{
    ConditionOp, FailureCondition, Step, StepError, StepMetadata, StepStatus,
};
pub use task::{
    InputRequest, Task, TaskError, TaskExecutionMetadata, TaskId, TaskMetadata, TaskStatus,
};
