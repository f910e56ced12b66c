// ==========================================
// 会计数据导入管道 - 仓储层错误类型
// ==========================================
// 覆盖: 执行记录存储 / 对象存储 / SQLite 加载器
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::types::ErrorKind;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 记录错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("记录已存在: {entity} with id={id}")]
    AlreadyExists { entity: String, id: String },

    // ===== 数据库错误 =====
    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    // ===== 存储错误 =====
    #[error("对象存储不可用: {0}")]
    StorageUnavailable(String),

    #[error("对象不存在: {container}/{path}")]
    ObjectNotFound { container: String, path: String },

    #[error("文件读写失败: {0}")]
    IoError(String),

    #[error("序列化失败: {0}")]
    SerializationError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl RepositoryError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        RepositoryError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 映射到管道错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound { .. } | RepositoryError::ObjectNotFound { .. } => {
                ErrorKind::NotFound
            }
            RepositoryError::AlreadyExists { .. } | RepositoryError::UniqueConstraintViolation(_) => {
                ErrorKind::InvalidState
            }
            RepositoryError::DatabaseConnectionError(_)
            | RepositoryError::DatabaseTransactionError(_)
            | RepositoryError::DatabaseQueryError(_) => ErrorKind::DatabaseUnavailable,
            RepositoryError::StorageUnavailable(_) | RepositoryError::IoError(_) => {
                ErrorKind::StorageUnavailable
            }
            RepositoryError::LockError(_)
            | RepositoryError::SerializationError(_)
            | RepositoryError::InternalError(_) => ErrorKind::Internal,
        }
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                if msg.contains("UNIQUE") {
                    RepositoryError::UniqueConstraintViolation(msg)
                } else {
                    RepositoryError::DatabaseQueryError(msg)
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::IoError(err.to_string())
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::SerializationError(err.to_string())
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
