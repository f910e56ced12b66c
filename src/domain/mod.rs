// ==========================================
// 会计数据导入管道 - 领域层
// ==========================================
// 职责: 执行记录 / 字段目录 / 数据帧 / 映射 / 校验报告
// ==========================================

pub mod catalog;
pub mod execution;
pub mod frame;
pub mod mapping;
pub mod report;
pub mod types;

pub use catalog::{FieldCatalogs, FieldDefinition, FieldType, JournalCatalog, TrialBalanceCatalog};
pub use execution::{
    child_execution_id, Execution, ExecutionError, ExecutionFilter, ExecutionPair,
    ExecutionUpdate, LoadResult, LoaderErrorEnvelope, NewExecution, PrincipalContext,
    ProjectContext, PublishedPaths,
};
pub use frame::Frame;
pub use mapping::{
    ColumnMapping, ManualDecision, MappingEntry, MappingOrigin, MappingResult, UnmappedColumn,
    UserDecisions,
};
pub use report::{
    CheckResult, JournalStats, PhaseReport, TrialBalanceStats, ValidationReport, Violation,
};
pub use types::{ErrorKind, ExecutionStatus, FileType};
