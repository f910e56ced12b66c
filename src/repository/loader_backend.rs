// ==========================================
// 会计数据导入管道 - 下游加载器接口
// ==========================================
// 契约: 输入 {authUserId, executionId}，返回 LoadResult
//       业务失败走错误信封（LoadResult.error），基础设施失败走 Err
// ==========================================

use crate::domain::execution::{LoadResult, PublishedPaths};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 加载请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderRequest {
    pub auth_user_id: String,
    pub execution_id: String,
    pub project_id: String,
    pub tenant_id: Option<String>,
    pub workspace_id: Option<String>,
    /// 已发布的结果路径（results 容器内）
    pub published: PublishedPaths,
}

#[async_trait]
pub trait LoaderBackend: Send + Sync {
    async fn run_load(&self, request: &LoaderRequest) -> RepositoryResult<LoadResult>;
}
