// ==========================================
// 会计数据导入管道 - 导入层
// ==========================================
// 职责: 文件解析、数值/日期规范化、目录类型转换、
//       自动/人工映射、Libro Diario 与 Sumas y Saldos 转换
// 支持: CSV/TXT, Excel (xlsx/xls)
// ==========================================

// 模块声明
pub mod csv_writer;
pub mod datetime;
pub mod error;
pub mod file_parser;
pub mod journal_mapper;
pub mod journal_transformer;
pub mod manual_mapping;
pub mod numeric;
pub mod suggestions;
pub mod text;
pub mod trial_balance_mapper;
pub mod trial_balance_processor;
pub mod type_transformer;

// 重导出核心类型
pub use csv_writer::{frame_from_csv, frame_to_csv};
pub use datetime::{DateTimeKind, DateTimeNormalizer};
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, ExcelParser, FileParser, Grid, UniversalFileParser};
pub use journal_mapper::JournalMapper;
pub use journal_transformer::{JournalOutput, JournalSplit, JournalTransformer};
pub use manual_mapping::{apply_user_decisions, ManualMappingOptions};
pub use numeric::NumericNormalizer;
pub use trial_balance_mapper::TrialBalanceMapper;
pub use trial_balance_processor::{PreparedTrialBalance, TrialBalanceOutput, TrialBalanceProcessor};
pub use type_transformer::TypeTransformer;
