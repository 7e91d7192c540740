//! TaskRepository implementations

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use webrunner_core::repo::{RepoError, TaskFilter, TaskRepository};
use webrunner_core::types::Task;

/// In-memory implementation for development and testing
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(task: &Task, filter: &TaskFilter) -> bool {
    if let Some(status) = filter.status {
        if task.status != status {
            return false;
        }
    }
    if let Some(query) = &filter.goal_contains {
        if !task
            .goal
            .to_ascii_lowercase()
            .contains(&query.to_ascii_lowercase())
        {
            return false;
        }
    }
    true
}

fn sort_recent_first(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepoError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, RepoError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        Ok(tasks.get(id).cloned())
    }

    async fn find_all(&self, filter: &TaskFilter) -> Result<Vec<Task>, RepoError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| matches(t, filter))
            .cloned()
            .collect();
        sort_recent_first(&mut found);
        Ok(found)
    }

    async fn update(&self, id: &str, patch: Value) -> Result<(), RepoError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;

        let mut raw = serde_json::to_value(&*task)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        if let (Value::Object(target), Value::Object(changes)) = (&mut raw, patch) {
            for (key, value) in changes {
                target.insert(key, value);
            }
        }
        *task = serde_json::from_value(raw)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RepoError> {
        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        Ok(tasks.remove(id).is_some())
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<Task>, RepoError> {
        let mut found = self.find_all(&TaskFilter::any()).await?;
        found.truncate(limit);
        Ok(found)
    }

    async fn search_by_goal(&self, query: &str) -> Result<Vec<Task>, RepoError> {
        self.find_all(&TaskFilter::any().with_goal_contains(query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webrunner_core::types::TaskStatus;

    fn task(goal: &str) -> Task {
        Task::new(goal, Vec::new())
    }

    #[tokio::test]
    async fn test_save_and_find_round_trip() {
        let repo = InMemoryTaskRepository::new();
        let task = task("collect prices");
        repo.save(&task).await.expect("save");
        let loaded = repo
            .find_by_id(&task.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(loaded, task);
    }

    #[tokio::test]
    async fn test_search_by_goal_is_case_insensitive() {
        let repo = InMemoryTaskRepository::new();
        repo.save(&task("Collect iPhone prices")).await.expect("save");
        repo.save(&task("book flights")).await.expect("save");

        let found = repo.search_by_goal("iphone").await.expect("search");
        assert_eq!(found.len(), 1);
        assert!(found[0].goal.contains("iPhone"));
    }

    #[tokio::test]
    async fn test_filter_by_status() {
        let repo = InMemoryTaskRepository::new();
        let mut running = task("a");
        running.start().expect("start");
        repo.save(&running).await.expect("save");
        repo.save(&task("b")).await.expect("save");

        let found = repo
            .find_all(&TaskFilter::any().with_status(TaskStatus::Running))
            .await
            .expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].goal, "a");
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let repo = InMemoryTaskRepository::new();
        let task = task("patch me");
        repo.save(&task).await.expect("save");

        repo.update(&task.id, json!({"error": "manual override"}))
            .await
            .expect("update");
        let loaded = repo
            .find_by_id(&task.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(loaded.error.as_deref(), Some("manual override"));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let repo = InMemoryTaskRepository::new();
        let task = task("temp");
        repo.save(&task).await.expect("save");
        assert!(repo.delete(&task.id).await.expect("delete"));
        assert!(!repo.delete(&task.id).await.expect("delete again"));
    }
}
