//! ExecutionHistoryRepository implementations

use std::sync::RwLock;

use async_trait::async_trait;

use webrunner_core::repo::{
    ExecutionHistoryRepository, HistoryEntry, HistoryQuery, RepoError,
};

/// In-memory implementation for development and testing
pub struct InMemoryHistoryRepository {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryHistoryRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryHistoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionHistoryRepository for InMemoryHistoryRepository {
    async fn save(&self, entry: HistoryEntry) -> Result<(), RepoError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        entries.push(entry);
        Ok(())
    }

    async fn find_by_task_id(
        &self,
        task_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryEntry>, RepoError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        let mut found: Vec<HistoryEntry> = entries
            .iter()
            .filter(|e| e.task_id == task_id)
            .filter(|e| query.kind.map_or(true, |kind| e.kind == kind))
            .cloned()
            .collect();
        // Newest first for lookups; the timeline keeps chronological order.
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn delete_by_task_id(&self, task_id: &str) -> Result<usize, RepoError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        let before = entries.len();
        entries.retain(|e| e.task_id != task_id);
        Ok(before - entries.len())
    }

    async fn get_timeline(&self, task_id: &str) -> Result<Vec<HistoryEntry>, RepoError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        let mut found: Vec<HistoryEntry> = entries
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webrunner_core::repo::HistoryEntryKind;

    #[tokio::test]
    async fn test_find_by_task_id_filters_kind_and_limit() {
        let repo = InMemoryHistoryRepository::new();
        repo.save(HistoryEntry::event("t1", json!({"n": 1})))
            .await
            .expect("save");
        repo.save(HistoryEntry::step_result("t1", json!({"n": 2})))
            .await
            .expect("save");
        repo.save(HistoryEntry::event("t2", json!({"n": 3})))
            .await
            .expect("save");

        let events = repo
            .find_by_task_id(
                "t1",
                &HistoryQuery {
                    kind: Some(HistoryEntryKind::Event),
                    limit: None,
                },
            )
            .await
            .expect("find");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["n"], 1);

        let limited = repo
            .find_by_task_id(
                "t1",
                &HistoryQuery {
                    kind: None,
                    limit: Some(1),
                },
            )
            .await
            .expect("find");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_timeline_is_chronological() {
        let repo = InMemoryHistoryRepository::new();
        for n in 0..3 {
            repo.save(HistoryEntry::event("t1", json!({"n": n})))
                .await
                .expect("save");
        }
        let timeline = repo.get_timeline("t1").await.expect("timeline");
        let order: Vec<i64> = timeline
            .iter()
            .map(|e| e.data["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_delete_by_task_id_reports_count() {
        let repo = InMemoryHistoryRepository::new();
        repo.save(HistoryEntry::event("t1", json!({})))
            .await
            .expect("save");
        repo.save(HistoryEntry::event("t1", json!({})))
            .await
            .expect("save");
        assert_eq!(repo.delete_by_task_id("t1").await.expect("delete"), 2);
        assert_eq!(repo.delete_by_task_id("t1").await.expect("delete"), 0);
    }
}
