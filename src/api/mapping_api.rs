// ==========================================
// 会计数据导入管道 - 映射 API
// ==========================================
// 职责: getAutoMapping / applyManualMapping 及其 Sumas y Saldos 变体
// 输入: userDecisions = {sourceColumn → {field_type, confidence?, note?}}
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::import_api::require_id;
use crate::domain::mapping::{MappingResult, UserDecisions};
use crate::domain::types::FileType;
use crate::engine::coordinator::{ManualMappingOutcome, MappingStats, PipelineCoordinator};
use crate::importer::manual_mapping::ManualMappingOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// applyManualMapping 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMappingResponse {
    pub csv_path: String,
    pub stats: MappingStats,
}

impl From<ManualMappingOutcome> for ManualMappingResponse {
    fn from(outcome: ManualMappingOutcome) -> Self {
        Self {
            csv_path: outcome.csv_path,
            stats: outcome.stats,
        }
    }
}

/// 映射API
pub struct MappingApi {
    coordinator: Arc<PipelineCoordinator>,
}

impl MappingApi {
    pub fn new(coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Libro Diario 自动映射结果（含未映射列分析）
    pub async fn get_auto_mapping(&self, execution_id: &str) -> ApiResult<MappingResult> {
        self.expect(execution_id, FileType::Je).await?;
        Ok(self.coordinator.auto_map(execution_id).await?)
    }

    pub async fn get_trial_balance_auto_mapping(&self, execution_id: &str) -> ApiResult<MappingResult> {
        self.expect(execution_id, FileType::Sys).await?;
        Ok(self.coordinator.auto_map(execution_id).await?)
    }

    /// 应用人工映射
    ///
    /// # 参数
    /// - decisions: 用户决策
    /// - force_override: 目标字段已被占用时允许抢占
    ///
    /// # 返回
    /// - Ok(ManualMappingResponse): 规范化 CSV 路径 + 统计
    /// - Err(InvalidInput): 未知列 / 未知字段 / 字段冲突
    /// - Err(MappingIncomplete): 决策后仍缺必需字段
    pub async fn apply_manual_mapping(
        &self,
        execution_id: &str,
        decisions: &UserDecisions,
        force_override: bool,
    ) -> ApiResult<ManualMappingResponse> {
        self.expect(execution_id, FileType::Je).await?;
        self.apply(execution_id, decisions, force_override).await
    }

    pub async fn apply_trial_balance_mapping(
        &self,
        execution_id: &str,
        decisions: &UserDecisions,
        force_override: bool,
    ) -> ApiResult<ManualMappingResponse> {
        self.expect(execution_id, FileType::Sys).await?;
        self.apply(execution_id, decisions, force_override).await
    }

    async fn apply(
        &self,
        execution_id: &str,
        decisions: &UserDecisions,
        force_override: bool,
    ) -> ApiResult<ManualMappingResponse> {
        let outcome = self
            .coordinator
            .apply_manual_mapping(execution_id, decisions, ManualMappingOptions { force_override })
            .await?;
        Ok(outcome.into())
    }

    async fn expect(&self, execution_id: &str, expected: FileType) -> ApiResult<()> {
        require_id(execution_id)?;
        let exec = self.coordinator.execution_info(execution_id).await?;
        if exec.file_type != expected {
            return Err(ApiError::InvalidInput(format!(
                "执行 {} 的文件类型为 {}，该接口只接受 {}",
                execution_id, exec.file_type, expected
            )));
        }
        Ok(())
    }
}

/// 解析客户端提交的 userDecisions JSON
pub fn parse_user_decisions(value: serde_json::Value) -> ApiResult<UserDecisions> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::InvalidInput(format!("userDecisions 格式错误: {}", e)))
}
