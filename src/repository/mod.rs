// ==========================================
// 会计数据导入管道 - 数据仓储层
// ==========================================
// 职责: 执行记录存储、对象存储、下游加载器
// 红线: Repository 不含业务逻辑，不推进执行状态
// ==========================================

pub mod error;
pub mod execution_lock;
pub mod execution_store;
pub mod file_store;
pub mod loader_backend;
pub mod memory_store;
pub mod sqlite_loader;
pub mod storage;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use execution_lock::{ExecutionGuard, ExecutionLocks};
pub use execution_store::ExecutionStore;
pub use file_store::FileExecutionStore;
pub use loader_backend::{LoaderBackend, LoaderRequest};
pub use memory_store::MemoryExecutionStore;
pub use sqlite_loader::SqliteLoaderBackend;
pub use storage::{InMemoryStorageBackend, LocalStorageBackend, StorageBackend};
