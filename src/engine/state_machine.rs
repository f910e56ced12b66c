// ==========================================
// 会计数据导入管道 - 执行状态机
// ==========================================
// 职责: 事件 → 状态迁移（纯函数，不做 I/O）
// 红线: 非法迁移一律 InvalidState，不静默忽略
// ==========================================
//
// pending ──upload──▶ uploading ──▶ uploaded ──auto-map──▶ mapping-required / mapped
// mapping-required ──manual-map──▶ mapped ──validate──▶ validated / failed
// validated ──pair-ready──▶ publish-ready ──publish──▶ publishing ──▶ completed
// any(非终态) ──cancel / error──▶ failed
// ==========================================

use crate::domain::types::ExecutionStatus;
use crate::engine::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineEvent {
    UploadStarted,
    UploadCompleted,
    /// 自动映射完成; requires_manual = 仍有未映射列或缺必需字段
    AutoMapped { requires_manual: bool },
    ManualMappingStarted,
    ManualMappingApplied,
    ValidationStarted,
    ValidationFinished { passed: bool },
    /// 兄弟执行均已校验通过（或单文件模式）
    PairReady,
    PublishStarted,
    Published,
    LoaderInvoked,
    Cancelled,
    Errored,
}

impl PipelineEvent {
    /// 写入 Execution.step 的进度标签
    pub fn step(&self) -> &'static str {
        match self {
            PipelineEvent::UploadStarted => "upload_started",
            PipelineEvent::UploadCompleted => "upload_completed",
            PipelineEvent::AutoMapped { requires_manual: true } => "auto_mapping_incomplete",
            PipelineEvent::AutoMapped { requires_manual: false } => "auto_mapping_completed",
            PipelineEvent::ManualMappingStarted => "manual_mapping_started",
            PipelineEvent::ManualMappingApplied => "manual_mapping_applied",
            PipelineEvent::ValidationStarted => "validation_started",
            PipelineEvent::ValidationFinished { passed: true } => "validation_passed",
            PipelineEvent::ValidationFinished { passed: false } => "validation_failed",
            PipelineEvent::PairReady => "publish_ready",
            PipelineEvent::PublishStarted => "publish_started",
            PipelineEvent::Published => "published",
            PipelineEvent::LoaderInvoked => "loader_invoked",
            PipelineEvent::Cancelled => "cancelled",
            PipelineEvent::Errored => "error",
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step())
    }
}

pub struct StateMachine;

impl StateMachine {
    /// 计算迁移目标，非法迁移返回 None
    pub fn next(from: ExecutionStatus, event: PipelineEvent) -> Option<ExecutionStatus> {
        use ExecutionStatus as S;
        use PipelineEvent as E;

        let to = match (from, event) {
            (S::Pending, E::UploadStarted) => S::Uploading,
            (S::Pending | S::Uploading, E::UploadCompleted) => S::Uploaded,

            (S::Uploaded | S::MappingRequired, E::AutoMapped { requires_manual }) => {
                if requires_manual {
                    S::MappingRequired
                } else {
                    S::Mapped
                }
            }

            (S::MappingRequired | S::Mapped, E::ManualMappingStarted) => S::ManualMappingPending,
            // Failed 仅在校验失败后允许重新映射（由协调器按错误类别把关）
            (S::ManualMappingPending | S::MappingRequired | S::Mapped | S::Failed, E::ManualMappingApplied) => {
                S::Mapped
            }

            (S::Mapped | S::Validated | S::Failed, E::ValidationStarted) => S::Validating,
            (S::Validating, E::ValidationFinished { passed: true }) => S::Validated,
            (S::Validating, E::ValidationFinished { passed: false }) => S::Failed,

            (S::Validated, E::PairReady) => S::PublishReady,
            (S::PublishReady, E::PairReady) => S::PublishReady,

            (S::Validated | S::PublishReady, E::PublishStarted) => S::Publishing,
            (S::Publishing, E::Published) => S::Completed,
            (S::Completed, E::LoaderInvoked) => S::Completed,

            (from, E::Cancelled | E::Errored) if !from.is_terminal() => S::Failed,
            _ => return None,
        };
        Some(to)
    }

    /// 迁移或返回 InvalidState
    pub fn apply(
        execution_id: &str,
        from: ExecutionStatus,
        event: PipelineEvent,
    ) -> PipelineResult<ExecutionStatus> {
        Self::next(from, event).ok_or_else(|| PipelineError::InvalidState {
            execution_id: execution_id.to_string(),
            status: from,
            operation: event.step().to_string(),
        })
    }
}
