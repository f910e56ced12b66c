// ==========================================
// 会计数据导入管道 - 发布 API
// ==========================================
// 职责: publishResults / 手动触发加载器
// 红线: 加载器失败不回滚已发布 CSV
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::import_api::require_id;
use crate::domain::execution::{LoadResult, PublishedPaths};
use crate::engine::coordinator::{PipelineCoordinator, RefusedFile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// publishResults 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub paths: PublishedPaths,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refused: Vec<RefusedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_result: Option<LoadResult>,
}

/// 发布API
pub struct PublishApi {
    coordinator: Arc<PipelineCoordinator>,
}

impl PublishApi {
    pub fn new(coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { coordinator }
    }

    /// 发布配对中已通过校验的文件
    ///
    /// # 返回
    /// - Ok: 已发布路径；被拒绝的文件列在 refused 中
    /// - Err(ValidationFailed): 没有任何文件可发布
    pub async fn publish_results(
        &self,
        execution_id: &str,
        project_id: Option<&str>,
    ) -> ApiResult<PublishResponse> {
        require_id(execution_id)?;
        let outcome = self
            .coordinator
            .publish_results(execution_id, project_id)
            .await?;

        if outcome.paths.is_empty() && !outcome.refused.is_empty() {
            warn!(execution_id, refused = outcome.refused.len(), "没有可发布的文件");
            return Err(ApiError::ValidationFailed {
                execution_id: execution_id.to_string(),
                failed_phases: outcome
                    .refused
                    .iter()
                    .map(|r| format!("{}: {}", r.execution_id, r.reason))
                    .collect(),
            });
        }

        Ok(PublishResponse {
            paths: outcome.paths,
            refused: outcome.refused,
            loader_result: outcome.loader_result,
        })
    }

    /// 手动触发加载器（幂等）
    ///
    /// 业务错误信封以 LoaderReported 返回
    pub async fn run_loader(&self, execution_id: &str) -> ApiResult<LoadResult> {
        require_id(execution_id)?;
        let result = self.coordinator.invoke_loader(execution_id).await?;
        match result.error {
            Some(envelope) => Err(ApiError::LoaderReported(envelope)),
            None => Ok(result),
        }
    }
}
