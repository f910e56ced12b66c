// ==========================================
// 会计数据导入管道 - CSV 序列化
// ==========================================
// 职责: Frame ↔ CSV 字节（映射产物与发布结果共用）
// ==========================================

use crate::domain::frame::Frame;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{grid_to_frame, CsvParser, FileParser};
use csv::WriterBuilder;

/// 写出 CSV（含表头，UTF-8）
///
/// # 参数
/// - frame: 数据帧
/// - delimiter: 分隔符（',' 或 ';'）
pub fn frame_to_csv(frame: &Frame, delimiter: u8) -> ImportResult<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());

    writer
        .write_record(frame.column_names())
        .map_err(|e| ImportError::CsvWriteError(e.to_string()))?;
    for row in frame.rows() {
        writer
            .write_record(&row)
            .map_err(|e| ImportError::CsvWriteError(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ImportError::CsvWriteError(e.to_string()))
}

/// 读回已知分隔符的 CSV（首行为表头）
pub fn frame_from_csv(bytes: &[u8], delimiter: u8, name: &str) -> ImportResult<Frame> {
    let grid = CsvParser::with_delimiter(delimiter).parse_grid(bytes)?;
    grid_to_frame(grid, name)
}
