// ==========================================
// 会计数据导入管道 - 管道错误类型
// ==========================================
// 职责: 阶段边界统一的错误信封，跨阶段错误一律归入 ErrorKind
// 工具: thiserror 派生宏
// ==========================================

use crate::config::settings::ConfigError;
use crate::domain::execution::ExecutionError;
use crate::domain::types::{ErrorKind, ExecutionStatus};
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("校验未通过 (execution={execution_id}): {}", .failed_phases.join(", "))]
    ValidationFailed {
        execution_id: String,
        failed_phases: Vec<String>,
    },

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("执行不存在: {0}")]
    NotFound(String),

    #[error("执行 {execution_id} 处于 {status} 状态，不能执行 {operation}")]
    InvalidState {
        execution_id: String,
        status: ExecutionStatus,
        operation: String,
    },

    #[error("输入无效: {0}")]
    InvalidInput(String),

    #[error("执行 {execution_id} 已取消: {reason}")]
    Cancelled { execution_id: String, reason: String },

    #[error("加载器返回错误 [{code}]: {message}")]
    LoaderReported { code: String, message: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            PipelineError::Import(e) => e.kind(),
            PipelineError::Repository(e) => e.kind(),
            PipelineError::Config(e) => e.kind(),
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::InvalidState { .. } => ErrorKind::InvalidState,
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
            PipelineError::LoaderReported { .. } => ErrorKind::LoaderReportedError,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 可按指数退避重试
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// 可恢复: 执行保持当前状态，等待用户干预
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    /// 挂到执行记录上的错误
    pub fn to_execution_error(&self) -> ExecutionError {
        ExecutionError::new(self.kind(), self.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        let err: PipelineError = ImportError::CsvParseError("bad".into()).into();
        assert_eq!(err.kind(), ErrorKind::FormatUnreadable);
        assert!(!err.is_recoverable());

        let err: PipelineError = ImportError::MappingIncomplete {
            missing: vec!["amount".into()],
        }
        .into();
        assert!(err.is_recoverable());

        let err: PipelineError = RepositoryError::StorageUnavailable("503".into()).into();
        assert!(err.is_retryable());

        let err = PipelineError::Cancelled {
            execution_id: "e".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.to_execution_error().kind, ErrorKind::Cancelled);
    }
}
