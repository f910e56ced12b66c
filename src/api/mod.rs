// ==========================================
// 会计数据导入管道 - API 层
// ==========================================
// 职责: 对外接口（上传 / 映射 / 校验 / 发布），抽象自 HTTP
// ==========================================

pub mod error;
pub mod import_api;
pub mod mapping_api;
pub mod publish_api;
pub mod validation_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use import_api::ImportApi;
pub use mapping_api::{parse_user_decisions, ManualMappingResponse, MappingApi};
pub use publish_api::{PublishApi, PublishResponse};
pub use validation_api::ValidationApi;
