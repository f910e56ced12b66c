// ==========================================
// 会计数据导入管道 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::types::ErrorKind;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .csv/.txt/.xlsx/.xls）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("文件无数据行: {0}")]
    EmptyFile(String),

    // ===== 映射错误 =====
    #[error("未找到表头行（已扫描 {scanned} 行，需同时包含 CUENTA 与 SALDO）")]
    HeaderNotFound { scanned: usize },

    #[error("必填字段未映射: {}", .missing.join(", "))]
    MappingIncomplete { missing: Vec<String> },

    #[error("源列不存在: {0}")]
    UnknownColumn(String),

    #[error("目标字段不在目录中 (源列 {column}): {field}")]
    UnknownField { column: String, field: String },

    #[error("目标字段已被源列 {existing} 占用: {field}")]
    DuplicateTarget { field: String, existing: String },

    // ===== 转换错误 =====
    #[error("类型转换失败 (行 {row}, 字段 {field}): {message}")]
    TypeConversionError {
        row: usize,
        field: String,
        message: String,
    },

    #[error("CSV 写入失败: {0}")]
    CsvWriteError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ImportError {
    /// 映射到管道错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::FileNotFound(_) => ErrorKind::NotFound,
            ImportError::UnsupportedFormat(_) => ErrorKind::InvalidInput,
            ImportError::FileReadError(_)
            | ImportError::ExcelParseError(_)
            | ImportError::CsvParseError(_)
            | ImportError::EmptyFile(_)
            | ImportError::HeaderNotFound { .. } => ErrorKind::FormatUnreadable,
            ImportError::MappingIncomplete { .. } => ErrorKind::MappingIncomplete,
            ImportError::UnknownColumn(_)
            | ImportError::UnknownField { .. }
            | ImportError::DuplicateTarget { .. } => ErrorKind::InvalidInput,
            ImportError::TypeConversionError { .. } => ErrorKind::FormatUnreadable,
            ImportError::CsvWriteError(_) | ImportError::InternalError(_) => ErrorKind::Internal,
        }
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ImportError::CsvParseError("x".into()).kind(),
            ErrorKind::FormatUnreadable
        );
        assert_eq!(
            ImportError::MappingIncomplete {
                missing: vec!["amount".into()]
            }
            .kind(),
            ErrorKind::MappingIncomplete
        );
    }

    #[test]
    fn test_mapping_incomplete_message_lists_fields() {
        let err = ImportError::MappingIncomplete {
            missing: vec!["journal_entry_id".into(), "amount".into()],
        };
        assert!(err.to_string().contains("journal_entry_id, amount"));
    }
}
