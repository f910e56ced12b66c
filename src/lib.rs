// ==========================================
// 会计数据导入管道 - 核心库
// ==========================================
// 输入: Libro Diario（日记账）/ Sumas y Saldos（试算平衡表）
// 流程: 上传 → 自动/人工映射 → 规范化 → 校验 → 发布 → 下游加载
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 执行记录 / 对象存储 / 加载器
pub mod repository;

// 引擎层 - 协调器与校验
pub mod engine;

// 导入层 - 解析与映射
pub mod importer;

// 配置层 - 管道配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 启动装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ErrorKind, ExecutionStatus, FileType};

// 领域实体
pub use domain::{Execution, FieldCatalogs, Frame, MappingResult, ValidationReport};

// 引擎
pub use engine::{JournalValidator, PipelineCoordinator, TrialBalanceValidator};

// API
pub use api::{ImportApi, MappingApi, PublishApi, ValidationApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "会计数据导入管道";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
