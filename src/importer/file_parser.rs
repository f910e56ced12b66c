// ==========================================
// 会计数据导入管道 - 文件解析器实现
// ==========================================
// 支持: CSV / TXT（分隔符嗅探 + UTF-8/Latin-1）与 Excel (.xlsx/.xls)
// 输出: 原始网格（表头检测用）或带表头的数据帧
// ==========================================

use crate::domain::frame::Frame;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::trial_balance_mapper::unique_headers;
use calamine::{Data, Reader, Xls, Xlsx};
use chrono::{Duration, NaiveDate, Timelike};
use csv::ReaderBuilder;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// 原始网格: 行 × 单元格
///
/// numeric 与 rows 同形，true 表示单元格来自带类型的数值（Excel Int/Float），
/// 其文本已是规范十进制，清洗时不再做千分位/小数点判定
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    pub rows: Vec<Vec<String>>,
    pub numeric: Vec<Vec<bool>>,
}

impl Grid {
    /// 纯文本网格（CSV / TXT）
    pub fn from_text(rows: Vec<Vec<String>>) -> Self {
        let numeric = rows.iter().map(|r| vec![false; r.len()]).collect();
        Self { rows, numeric }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_numeric(&self, row: usize, col: usize) -> bool {
        self.numeric
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(false)
    }
}

/// 嗅探候选分隔符
const DELIMITER_CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];
/// 嗅探使用的行数
const SNIFF_LINES: usize = 20;

// ==========================================
// FileParser Trait
// ==========================================
pub trait FileParser: Send + Sync {
    /// 解析为原始网格（不区分表头）
    ///
    /// # 参数
    /// - bytes: 文件内容
    ///
    /// # 返回
    /// - Ok(Grid): 行列表，单元格已 trim
    /// - Err: FormatUnreadable 类错误
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<Grid>;
}

// ==========================================
// CSV Parser 实现
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvParser {
    /// None → 自动嗅探
    pub delimiter: Option<u8>,
}

impl CsvParser {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }
}

impl FileParser for CsvParser {
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<Grid> {
        let text = decode_text(bytes);
        let delimiter = self.delimiter.unwrap_or_else(|| sniff_delimiter(&text));
        debug!(delimiter = %(delimiter as char), "CSV 分隔符");

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(|v| v.trim().to_string()).collect());
        }
        Ok(Grid::from_text(rows))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
#[derive(Debug, Clone, Copy)]
pub enum ExcelFormat {
    Xlsx,
    Xls,
}

pub struct ExcelParser {
    pub format: ExcelFormat,
}

impl FileParser for ExcelParser {
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<Grid> {
        let cursor = Cursor::new(bytes.to_vec());
        match self.format {
            ExcelFormat::Xlsx => {
                let workbook: Xlsx<_> = Xlsx::new(cursor)
                    .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;
                first_sheet(workbook)
            }
            ExcelFormat::Xls => {
                let workbook: Xls<_> = Xls::new(cursor)
                    .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;
                first_sheet(workbook)
            }
        }
    }
}

/// 读取第一个工作表
fn first_sheet<R>(mut workbook: R) -> ImportResult<Grid>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: std::fmt::Display,
{
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?
        .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;

    let mut grid = Grid::default();
    for row in range.rows() {
        grid.rows.push(row.iter().map(render_cell).collect());
        grid.numeric
            .push(row.iter().map(|c| matches!(c, Data::Int(_) | Data::Float(_))).collect());
    }
    Ok(grid)
}

/// 单元格 → 文本
///
/// - 整数值浮点不带 ".0"
/// - 日期序列号 → ISO（零点时只输出日期）
fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => render_float(*f),
        Data::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Data::DateTime(dt) => render_excel_serial(dt.as_f64()),
        Data::DateTimeIso(s) => s.replace('T', " "),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => {
            debug!(error = ?e, "Excel 单元格错误值");
            String::new()
        }
    }
}

/// 浮点 → 规范十进制文本（只含 '-'、数字与至多一个 '.'）
fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        return format!("{}", f as i64);
    }
    // 抹掉二进制浮点尾差
    let fixed = format!("{:.10}", f);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Excel 1900 日期系统: 序列号 0 = 1899-12-30
fn render_excel_serial(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|d| d.and_hms_opt(0, 0, 0)) else {
        return render_float(serial);
    };
    let millis = (serial * 86_400_000.0).round() as i64;
    let dt = epoch + Duration::milliseconds(millis);
    if dt.num_seconds_from_midnight() == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// UTF-8（去 BOM）失败时按 Latin-1 解码
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            debug!("非 UTF-8 内容，按 Latin-1 解码");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// 分隔符嗅探: 选在前若干非空行中出现次数一致且最多的候选
fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    if lines.is_empty() {
        return b',';
    }

    let mut best = (b',', 0usize, 0usize);
    for &candidate in DELIMITER_CANDIDATES.iter() {
        let counts: Vec<usize> = lines.iter().map(|l| count_outside_quotes(l, candidate)).collect();
        let max = counts.iter().copied().max().unwrap_or(0);
        if max == 0 {
            continue;
        }
        // 与众数一致的行数越多越可信
        let consistent = counts.iter().filter(|c| **c == max).count();
        if (consistent, max) > (best.1, best.2) {
            best = (candidate, consistent, max);
        }
    }
    best.0
}

fn count_outside_quotes(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    /// 按扩展名选择解析器
    pub fn for_extension(ext: &str) -> ImportResult<Box<dyn FileParser>> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "csv" | "txt" => Ok(Box::new(CsvParser::default())),
            "xlsx" => Ok(Box::new(ExcelParser {
                format: ExcelFormat::Xlsx,
            })),
            "xls" => Ok(Box::new(ExcelParser {
                format: ExcelFormat::Xls,
            })),
            other => Err(ImportError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn parse_grid(&self, bytes: &[u8], file_name: &str) -> ImportResult<Grid> {
        let parser = Self::for_extension(&extension_of(file_name))?;
        parser.parse_grid(bytes)
    }

    /// 带表头的数据帧（首个非空行为表头）
    pub fn parse_frame(&self, bytes: &[u8], file_name: &str) -> ImportResult<Frame> {
        let grid = self.parse_grid(bytes, file_name)?;
        grid_to_frame(grid, file_name)
    }

    pub fn parse_path<P: AsRef<Path>>(&self, path: P) -> ImportResult<Frame> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        self.parse_frame(&bytes, &path.to_string_lossy())
    }
}

/// 首个非空行为表头，其后的全空行跳过
pub fn grid_to_frame(grid: Grid, file_name: &str) -> ImportResult<Frame> {
    let Grid { rows, numeric } = grid;
    let mut numeric = numeric.into_iter();
    let mut rows = rows
        .into_iter()
        .map(|row| (row, numeric.next().unwrap_or_default()))
        .filter(|(row, _)| row.iter().any(|c| !c.is_empty()));
    let (header, _) = rows
        .next()
        .ok_or_else(|| ImportError::EmptyFile(file_name.to_string()))?;
    let (data, flags): (Vec<_>, Vec<_>) = rows.unzip();
    Ok(Frame::from_typed_rows(unique_headers(&header), data, flags))
}

pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}
