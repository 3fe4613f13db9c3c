//! In-memory task store (non-persistent).

use super::{StoreError, Task, TaskStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace a task.
    pub async fn upsert(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Mark a task completed. Returns false if it does not exist.
    pub async fn set_completed(&self, id: &str, completed: bool) -> bool {
        match self.tasks.write().await.get_mut(id) {
            Some(task) => {
                task.completed = completed;
                true
            }
            None => false,
        }
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.tasks.write().await.remove(id).is_some()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list_active_reminder_candidates(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_reminder_candidate())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn list_active_reminder_candidates_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id && t.is_reminder_candidate())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }
}
