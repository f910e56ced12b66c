// ==========================================
// 会计数据导入管道 - 上传 API
// ==========================================
// 职责: upload / uploadProgress / executionInfo，以及执行的列表、取消、删除
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::execution::{Execution, ExecutionFilter, PrincipalContext};
use crate::domain::types::FileType;
use crate::engine::coordinator::{PipelineCoordinator, UploadReceipt, UploadRequest};
use crate::engine::upload_worker::UploadProgress;
use std::sync::Arc;
use tracing::info;

/// 上传API
pub struct ImportApi {
    coordinator: Arc<PipelineCoordinator>,
}

impl ImportApi {
    pub fn new(coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { coordinator }
    }

    /// 上传文件（Libro Diario；带 parent_execution_id 时为 Sumas y Saldos）
    ///
    /// # 参数
    /// - file_bytes: 文件内容
    /// - original_file_name: 客户端文件名（决定解析器）
    /// - parent_execution_id: 父执行 ID（仅 Sumas y Saldos）
    ///
    /// # 返回
    /// - Ok(UploadReceipt): executionId / fileName / message，处理在后台继续
    #[allow(clippy::too_many_arguments)]
    pub async fn upload(
        &self,
        file_bytes: Vec<u8>,
        original_file_name: &str,
        test_type: &str,
        project_id: &str,
        period: Option<&str>,
        parent_execution_id: Option<&str>,
        principal: Option<PrincipalContext>,
    ) -> ApiResult<UploadReceipt> {
        if original_file_name.trim().is_empty() {
            return Err(ApiError::InvalidInput("文件名不能为空".to_string()));
        }
        if project_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("项目ID不能为空".to_string()));
        }

        let request = UploadRequest {
            original_file_name: original_file_name.to_string(),
            test_type: test_type.to_string(),
            project_id: project_id.to_string(),
            period: period.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string),
            parent_execution_id: parent_execution_id.map(str::to_string),
            principal,
        };
        let receipt = self.coordinator.upload(request, file_bytes).await?;
        info!(execution_id = %receipt.execution_id, file = %receipt.file_name, "上传已受理");
        Ok(receipt)
    }

    pub async fn upload_progress(&self, execution_id: &str) -> ApiResult<UploadProgress> {
        require_id(execution_id)?;
        Ok(self.coordinator.upload_progress(execution_id).await?)
    }

    /// 等待后台上传及自动映射结束，返回执行快照
    pub async fn wait_for_upload(&self, execution_id: &str) -> ApiResult<Execution> {
        require_id(execution_id)?;
        Ok(self.coordinator.wait_for_upload(execution_id).await?)
    }

    pub async fn execution_info(&self, execution_id: &str) -> ApiResult<Execution> {
        require_id(execution_id)?;
        Ok(self.coordinator.execution_info(execution_id).await?)
    }

    /// 按文件类型（je / sys）与父执行过滤
    pub async fn list_executions(
        &self,
        file_type: Option<&str>,
        parent_execution_id: Option<&str>,
    ) -> ApiResult<Vec<Execution>> {
        let file_type = match file_type.map(str::trim).filter(|t| !t.is_empty()) {
            Some(raw) => Some(
                FileType::parse(raw)
                    .ok_or_else(|| ApiError::InvalidInput(format!("未知文件类型: {}", raw)))?,
            ),
            None => None,
        };
        let filter = ExecutionFilter {
            file_type,
            parent_execution_id: parent_execution_id.map(str::to_string),
        };
        Ok(self.coordinator.list(&filter).await?)
    }

    pub async fn cancel_execution(&self, execution_id: &str, reason: Option<&str>) -> ApiResult<Execution> {
        require_id(execution_id)?;
        Ok(self.coordinator.cancel(execution_id, reason).await?)
    }

    pub async fn delete_execution(&self, execution_id: &str) -> ApiResult<bool> {
        require_id(execution_id)?;
        Ok(self.coordinator.delete(execution_id).await?)
    }
}

pub(crate) fn require_id(execution_id: &str) -> ApiResult<()> {
    if execution_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("执行ID不能为空".to_string()));
    }
    Ok(())
}
