// ==========================================
// 会计数据导入管道 - 引擎层
// ==========================================
// 职责: 校验引擎、执行状态机、协调器、发布与加载器桥接
// 红线: 引擎不直接读写文件系统，一律经 repository 层的存储抽象
// ==========================================

pub mod cancellation;
pub mod coordinator;
pub mod error;
pub mod journal_validator;
pub mod loader_bridge;
pub mod period;
pub mod results_publisher;
pub mod retry;
pub mod state_machine;
pub mod trial_balance_validator;
pub mod upload_worker;

// 重导出核心类型
pub use cancellation::CancellationRegistry;
pub use coordinator::{
    ManualMappingOutcome, MappingStats, PipelineCoordinator, PublishOutcome, RefusedFile,
    UploadReceipt, UploadRequest,
};
pub use error::{PipelineError, PipelineResult};
pub use journal_validator::JournalValidator;
pub use loader_bridge::LoaderBridge;
pub use period::Period;
pub use results_publisher::ResultsPublisher;
pub use retry::RetryPolicy;
pub use state_machine::{PipelineEvent, StateMachine};
pub use trial_balance_validator::TrialBalanceValidator;
pub use upload_worker::{UploadProgress, UploadSink, UploadState, UploadTracker};
