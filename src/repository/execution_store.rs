// ==========================================
// 会计数据导入管道 - 执行记录存储接口 (C8)
// ==========================================
// 实现者: MemoryExecutionStore（本地）/ FileExecutionStore（容器）
// 红线: 更新只接受 ExecutionUpdate 白名单；子执行 ID 由父 ID 推导
// ==========================================

use crate::domain::execution::{
    child_execution_id, Execution, ExecutionFilter, ExecutionPair, ExecutionUpdate, NewExecution,
};
use crate::domain::types::FileType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// 写入新记录（ID 已存在时报 AlreadyExists）
    async fn insert(&self, execution: Execution) -> RepositoryResult<Execution>;

    async fn get(&self, id: &str) -> RepositoryResult<Option<Execution>>;

    /// 合并白名单字段并推进 updatedAt
    async fn update(&self, id: &str, update: ExecutionUpdate) -> RepositoryResult<Execution>;

    async fn list(&self, filter: &ExecutionFilter) -> RepositoryResult<Vec<Execution>>;

    /// 删除记录，返回是否存在
    async fn delete(&self, id: &str) -> RepositoryResult<bool>;

    /// 存储后端名称（日志用）
    fn backend_name(&self) -> &'static str;

    /// 新建执行（UUID）
    async fn create(&self, new: NewExecution) -> RepositoryResult<Execution> {
        let id = Uuid::new_v4().to_string();
        self.insert(Execution::from_new(id, new)).await
    }

    /// 新建配对执行：Sys 且带父 ID 时使用 {parentId}-ss
    async fn create_coordinated(&self, new: NewExecution) -> RepositoryResult<Execution> {
        let id = new.coordinated_id();
        self.insert(Execution::from_new(id, new)).await
    }

    /// 读取，不存在时报 NotFound
    async fn require(&self, id: &str) -> RepositoryResult<Execution> {
        self.get(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Execution", id))
    }

    /// 读取配对（任一成员 ID 均可）
    async fn get_coordinated(&self, id: &str) -> RepositoryResult<ExecutionPair> {
        let parent_id = match self.get(id).await? {
            Some(exec) => exec.pair_parent_id(),
            None => id
                .strip_suffix(crate::domain::execution::TRIAL_BALANCE_SUFFIX)
                .unwrap_or(id)
                .to_string(),
        };

        let parent = self
            .get(&parent_id)
            .await?
            .filter(|e| e.file_type == FileType::Je);
        let child = self.get(&child_execution_id(&parent_id)).await?;
        Ok(ExecutionPair { parent, child })
    }
}
