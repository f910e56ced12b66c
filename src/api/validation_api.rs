// ==========================================
// 会计数据导入管道 - 校验 API
// ==========================================
// 职责: runJournalValidations / runTrialBalanceValidations
// 说明: 校验未通过不是调用错误，完整报告照常返回（含 10 条违规样例）
// ==========================================

use crate::api::error::ApiResult;
use crate::api::import_api::require_id;
use crate::domain::report::ValidationReport;
use crate::engine::coordinator::PipelineCoordinator;
use std::sync::Arc;

/// 校验API
pub struct ValidationApi {
    coordinator: Arc<PipelineCoordinator>,
}

impl ValidationApi {
    pub fn new(coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Libro Diario 四阶段校验
    ///
    /// # 参数
    /// - period: "YYYY-MM" 或 "YYYY-MM-DD a YYYY-MM-DD"；缺省取上传时的期间
    pub async fn run_journal_validations(
        &self,
        execution_id: &str,
        period: Option<&str>,
    ) -> ApiResult<ValidationReport> {
        require_id(execution_id)?;
        let period = period.map(str::trim).filter(|p| !p.is_empty());
        Ok(self
            .coordinator
            .run_journal_validations(execution_id, period)
            .await?)
    }

    pub async fn run_trial_balance_validations(&self, execution_id: &str) -> ApiResult<ValidationReport> {
        require_id(execution_id)?;
        Ok(self
            .coordinator
            .run_trial_balance_validations(execution_id)
            .await?)
    }
}
