//! Persistence trait surfaces
//!
//! This module defines the repository collaborators the engine persists
//! through; implementations live in the stores crate. Entries are opaque to
//! the core: all it requires is that `save` is durable and `find_by_id`
//! returns what was saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Task, TaskStatus};

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Filters for task listing.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub goal_contains: Option<String>,
}

impl TaskFilter {
    /// A filter matching everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_goal_contains(mut self, query: impl Into<String>) -> Self {
        self.goal_contains = Some(query.into());
        self
    }
}

/// Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a task (insert or overwrite).
    async fn save(&self, task: &Task) -> Result<(), RepoError>;

    /// Load a task by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, RepoError>;

    /// List tasks matching a filter, most recently updated first.
    async fn find_all(&self, filter: &TaskFilter) -> Result<Vec<Task>, RepoError>;

    /// Merge a JSON object patch into the serialized task.
    async fn update(&self, id: &str, patch: Value) -> Result<(), RepoError>;

    /// Delete a task; returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, RepoError>;

    /// The `limit` most recently updated tasks.
    async fn find_recent(&self, limit: usize) -> Result<Vec<Task>, RepoError>;

    /// Tasks whose goal contains the query, case-insensitively.
    async fn search_by_goal(&self, query: &str) -> Result<Vec<Task>, RepoError>;
}

/// Kind of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEntryKind {
    Event,
    StepResult,
}

/// One append-only history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: HistoryEntryKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Record an emitted progress event.
    pub fn event(task_id: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: task_id.into(),
            kind: HistoryEntryKind::Event,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Record a step result.
    pub fn step_result(task_id: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: task_id.into(),
            kind: HistoryEntryKind::StepResult,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Query options for history lookups.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub kind: Option<HistoryEntryKind>,
    pub limit: Option<usize>,
}

/// Execution history persistence.
#[async_trait]
pub trait ExecutionHistoryRepository: Send + Sync {
    /// Append one entry.
    async fn save(&self, entry: HistoryEntry) -> Result<(), RepoError>;

    /// Entries for a task, filtered and limited, newest first.
    async fn find_by_task_id(
        &self,
        task_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryEntry>, RepoError>;

    /// Remove every entry of a task; returns how many were removed.
    async fn delete_by_task_id(&self, task_id: &str) -> Result<usize, RepoError>;

    /// All entries of a task in chronological order.
    async fn get_timeline(&self, task_id: &str) -> Result<Vec<HistoryEntry>, RepoError>;
}
