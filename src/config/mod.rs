// ==========================================
// 会计数据导入管道 - 配置层
// ==========================================
// 职责: 管道配置读取与启动快照
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod pipeline_config_trait;
pub mod settings;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use pipeline_config_trait::{ConfigResult, PipelineConfigReader};
pub use settings::{ConfigError, ContainerNames, ExecutionStoreKind, PipelineSettings};
