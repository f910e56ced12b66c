// ==========================================
// 会计数据导入管道 - API 层错误类型
// ==========================================
// 职责: 把管道错误翻译为调用方可读的错误（带分类码）
// 红线: 所有错误信息必须包含显式原因
// ==========================================

use crate::domain::execution::LoaderErrorEnvelope;
use crate::domain::types::ErrorKind;
use crate::engine::error::PipelineError;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 调用方可纠正的错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("映射不完整，缺少必需字段: {}", .missing.join(", "))]
    MappingIncomplete { missing: Vec<String> },

    #[error("校验未通过: {}", .failed_phases.join(", "))]
    ValidationFailed {
        execution_id: String,
        failed_phases: Vec<String>,
    },

    #[error("文件无法读取: {0}")]
    FormatUnreadable(String),

    // ==========================================
    // 基础设施错误（已按策略重试）
    // ==========================================
    #[error("对象存储不可用: {0}")]
    StorageUnavailable(String),

    #[error("数据库不可用: {0}")]
    DatabaseUnavailable(String),

    // ==========================================
    // 加载器 / 取消 / 配置
    // ==========================================
    #[error("加载器返回错误 [{}]: {}", .0.error_code, .0.error_message)]
    LoaderReported(LoaderErrorEnvelope),

    #[error("执行已取消: {0}")]
    Cancelled(String),

    #[error("缺少必需配置: {0}")]
    ConfigMissing(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidInput(_) => ErrorKind::InvalidInput,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::InvalidState(_) => ErrorKind::InvalidState,
            ApiError::MappingIncomplete { .. } => ErrorKind::MappingIncomplete,
            ApiError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            ApiError::FormatUnreadable(_) => ErrorKind::FormatUnreadable,
            ApiError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            ApiError::DatabaseUnavailable(_) => ErrorKind::DatabaseUnavailable,
            ApiError::LoaderReported(_) => ErrorKind::LoaderReportedError,
            ApiError::Cancelled(_) => ErrorKind::Cancelled,
            ApiError::ConfigMissing(_) => ErrorKind::ConfigMissing,
            ApiError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// 序列化给调用方的错误体
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.kind(),
            message: self.to_string(),
            envelope: match self {
                ApiError::LoaderReported(envelope) => Some(envelope.clone()),
                _ => None,
            },
        }
    }
}

// ==========================================
// 从 PipelineError 转换
// ==========================================
impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        use crate::importer::error::ImportError;

        match err {
            PipelineError::ValidationFailed {
                execution_id,
                failed_phases,
            } => ApiError::ValidationFailed {
                execution_id,
                failed_phases,
            },
            PipelineError::Import(ImportError::MappingIncomplete { missing }) => {
                ApiError::MappingIncomplete { missing }
            }
            PipelineError::NotFound(id) => ApiError::NotFound(format!("执行 {} 不存在", id)),
            e @ PipelineError::InvalidState { .. } => ApiError::InvalidState(e.to_string()),
            PipelineError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            PipelineError::Cancelled { reason, .. } => ApiError::Cancelled(reason),
            PipelineError::LoaderReported { code, message } => {
                ApiError::LoaderReported(LoaderErrorEnvelope {
                    error_code: code,
                    error_message: message,
                    error_title: None,
                    error_severity: None,
                    error_category: None,
                })
            }
            other => match other.kind() {
                ErrorKind::FormatUnreadable => ApiError::FormatUnreadable(other.to_string()),
                ErrorKind::StorageUnavailable => ApiError::StorageUnavailable(other.to_string()),
                ErrorKind::DatabaseUnavailable => ApiError::DatabaseUnavailable(other.to_string()),
                ErrorKind::ConfigMissing => ApiError::ConfigMissing(other.to_string()),
                ErrorKind::NotFound => ApiError::NotFound(other.to_string()),
                ErrorKind::InvalidInput => ApiError::InvalidInput(other.to_string()),
                ErrorKind::InvalidState => ApiError::InvalidState(other.to_string()),
                ErrorKind::MappingIncomplete => ApiError::MappingIncomplete {
                    missing: Vec::new(),
                },
                _ => ApiError::InternalError(other.to_string()),
            },
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        PipelineError::from(err).into()
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

/// 错误响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<LoaderErrorEnvelope>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::error::ImportError;

    #[test]
    fn test_pipeline_error_conversion() {
        let api: ApiError = PipelineError::NotFound("e1".into()).into();
        assert!(matches!(api, ApiError::NotFound(ref msg) if msg.contains("e1")));

        let api: ApiError = PipelineError::from(ImportError::MappingIncomplete {
            missing: vec!["amount".into()],
        })
        .into();
        match api {
            ApiError::MappingIncomplete { missing } => assert_eq!(missing, vec!["amount"]),
            other => panic!("unexpected: {:?}", other),
        }

        let api: ApiError = PipelineError::from(ImportError::CsvParseError("bad".into())).into();
        assert_eq!(api.kind(), ErrorKind::FormatUnreadable);

        let api: ApiError = RepositoryError::StorageUnavailable("503".into()).into();
        assert_eq!(api.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn test_loader_envelope_in_response() {
        let api: ApiError = PipelineError::LoaderReported {
            code: "LOAD_ORPHAN_DETAIL".into(),
            message: "detalle sin cabecera".into(),
        }
        .into();
        let response = api.to_response();
        assert_eq!(response.code, ErrorKind::LoaderReportedError);
        assert_eq!(response.envelope.unwrap().error_code, "LOAD_ORPHAN_DETAIL");
    }
}
