// ==========================================
// 会计数据导入管道 - 内存执行记录存储
// ==========================================
// 适用: 本地运行（进程退出即丢失）
// ==========================================

use crate::domain::execution::{Execution, ExecutionFilter, ExecutionUpdate};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::execution_store::ExecutionStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<String, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, execution: Execution) -> RepositoryResult<Execution> {
        let mut records = self.records.write().await;
        if records.contains_key(&execution.id) {
            return Err(RepositoryError::AlreadyExists {
                entity: "Execution".to_string(),
                id: execution.id,
            });
        }
        records.insert(execution.id.clone(), execution.clone());
        Ok(execution)
    }

    async fn get(&self, id: &str) -> RepositoryResult<Option<Execution>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: ExecutionUpdate) -> RepositoryResult<Execution> {
        let mut records = self.records.write().await;
        let exec = records
            .get_mut(id)
            .ok_or_else(|| RepositoryError::not_found("Execution", id))?;
        update.apply_to(exec);
        Ok(exec.clone())
    }

    async fn list(&self, filter: &ExecutionFilter) -> RepositoryResult<Vec<Execution>> {
        let records = self.records.read().await;
        let mut out: Vec<Execution> = records.values().filter(|e| filter.matches(e)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
