// ==========================================
// 会计数据导入管道 - 领域类型定义
// ==========================================
// 职责: 执行状态 / 文件类型 / 错误类别等基础枚举
// 序列化格式: kebab-case（与执行记录 JSON 一致）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 执行状态 (Execution Status)
// ==========================================
// 红线: 只有 PipelineCoordinator 可以推进状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    #[default]
    Pending,              // 已创建，等待上传
    Uploading,            // 后台上传中
    Uploaded,             // 原始文件已落存储
    MappingRequired,      // 自动映射后仍有未映射列
    ManualMappingPending, // 人工映射应用中
    Mapped,               // 映射完成，已产出规范 CSV
    Validating,           // 校验中
    Validated,            // 校验通过
    PublishReady,         // 兄弟执行均已校验通过
    Publishing,           // 结果发布中
    Completed,            // 已发布（加载器结果已记录）
    Failed,               // 失败（含取消 / 超时）
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Uploading => "uploading",
            ExecutionStatus::Uploaded => "uploaded",
            ExecutionStatus::MappingRequired => "mapping-required",
            ExecutionStatus::ManualMappingPending => "manual-mapping-pending",
            ExecutionStatus::Mapped => "mapped",
            ExecutionStatus::Validating => "validating",
            ExecutionStatus::Validated => "validated",
            ExecutionStatus::PublishReady => "publish-ready",
            ExecutionStatus::Publishing => "publishing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// 校验已通过（含其后的发布阶段）
    pub fn has_passed_validation(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Validated
                | ExecutionStatus::PublishReady
                | ExecutionStatus::Publishing
                | ExecutionStatus::Completed
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 文件类型 (File Type)
// ==========================================
// Je = Libro Diario, Sys = Sumas y Saldos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FileType {
    #[default]
    Je,
    Sys,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Je => "Je",
            FileType::Sys => "Sys",
        }
    }

    /// 发布目录使用的小写标签（je / sys）
    pub fn results_segment(&self) -> &'static str {
        match self {
            FileType::Je => "je",
            FileType::Sys => "sys",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "je" | "libro_diario" | "journal" => Some(FileType::Je),
            "sys" | "sumas_saldos" | "trial_balance" => Some(FileType::Sys),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 错误类别 (Error Kind)
// ==========================================
// 挂在执行记录上，也是 PipelineError 的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationFailed,
    MappingIncomplete,
    FormatUnreadable,
    StorageUnavailable,
    DatabaseUnavailable,
    LoaderReportedError,
    ConfigMissing,
    Cancelled,
    NotFound,
    InvalidState,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// 可重试（指数退避）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::StorageUnavailable | ErrorKind::DatabaseUnavailable
        )
    }

    /// 可恢复：执行保持当前状态，等待用户干预
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ValidationFailed
                | ErrorKind::MappingIncomplete
                | ErrorKind::InvalidInput
                | ErrorKind::InvalidState
                | ErrorKind::NotFound
                | ErrorKind::LoaderReportedError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::MappingIncomplete => "MAPPING_INCOMPLETE",
            ErrorKind::FormatUnreadable => "FORMAT_UNREADABLE",
            ErrorKind::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorKind::DatabaseUnavailable => "DATABASE_UNAVAILABLE",
            ErrorKind::LoaderReportedError => "LOADER_REPORTED_ERROR",
            ErrorKind::ConfigMissing => "CONFIG_MISSING",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}
