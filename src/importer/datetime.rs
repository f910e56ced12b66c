// ==========================================
// 会计数据导入管道 - 日期时间规范化 (C2)
// ==========================================
// 职责: 识别纯日期 / 纯时间 / 日期+时间列，拆分组合单元格
// 输出: 日期 YYYY-MM-DD，时间 HH:MM:SS
// 规则: 取前 10 个非空样本，占比 ≥ 0.7 判定类别
// ==========================================

use crate::domain::frame::Frame;
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// 采样数量
pub const SAMPLE_SIZE: usize = 10;
/// 类别判定阈值
pub const DETECTION_RATIO: f64 = 0.7;

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

// 年份在末尾: d{1,2}.d{1,2}.d{4} / d{1,2}/d{1,2}/d{4} / d{1,2}-d{1,2}-d{4}
const YEAR_LAST_PATTERNS: [&str; 3] = [
    r"(\d{1,2})\.(\d{1,2})\.(\d{4})",
    r"(\d{1,2})/(\d{1,2})/(\d{4})",
    r"(\d{1,2})-(\d{1,2})-(\d{4})",
];
// 年份在首位: d{4}-d{2}-d{2} / d{4}/d{2}/d{2} / d{4}.d{2}.d{2}
const YEAR_FIRST_PATTERNS: [&str; 3] = [
    r"(\d{4})-(\d{2})-(\d{2})",
    r"(\d{4})/(\d{2})/(\d{2})",
    r"(\d{4})\.(\d{2})\.(\d{2})",
];
const COMPACT_PATTERN: &str = r"(\d{8})";
const TIME_PATTERN: &str = r"(\d{1,2}):(\d{2})(?::(\d{2})(?:\.\d{1,9})?)?";

struct Patterns {
    date: Vec<(Regex, DateLayout)>,
    time: Regex,
    combined: Vec<(Regex, DateLayout)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateLayout {
    YearLast,
    YearFirst,
    Compact,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut sources: Vec<(&str, DateLayout)> = Vec::new();
        sources.extend(YEAR_LAST_PATTERNS.iter().map(|p| (*p, DateLayout::YearLast)));
        sources.extend(YEAR_FIRST_PATTERNS.iter().map(|p| (*p, DateLayout::YearFirst)));
        sources.push((COMPACT_PATTERN, DateLayout::Compact));

        let compile = |src: String| Regex::new(&src).expect("日期正则");
        Patterns {
            date: sources
                .iter()
                .map(|(p, layout)| (compile(format!("^{}$", p)), *layout))
                .collect(),
            time: compile(format!("^{}$", TIME_PATTERN)),
            combined: sources
                .iter()
                .map(|(p, layout)| (compile(format!(r"^{}[ T]{}$", p, TIME_PATTERN)), *layout))
                .collect(),
        }
    })
}

/// 列类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeKind {
    Date,
    Time,
    DateTime,
    Unknown,
}

/// separate 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationOutcome {
    pub field: String,
    pub kind: DateTimeKind,
    /// 组合列拆分时写入的伴随列
    pub companion_column: Option<String>,
    /// 非空但无法解析的单元格数（原值保留）
    pub parse_failures: usize,
}

// ==========================================
// DateTimeNormalizer
// ==========================================
pub struct DateTimeNormalizer;

impl DateTimeNormalizer {
    /// 按前 10 个非空样本判定列类别
    pub fn classify(values: &[String]) -> DateTimeKind {
        let samples: Vec<&str> = values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .take(SAMPLE_SIZE)
            .collect();
        if samples.is_empty() {
            return DateTimeKind::Unknown;
        }

        if match_ratio(&samples, Self::is_pure_date) >= DETECTION_RATIO {
            DateTimeKind::Date
        } else if match_ratio(&samples, Self::is_pure_time) >= DETECTION_RATIO {
            DateTimeKind::Time
        } else if match_ratio(&samples, Self::is_combined) >= DETECTION_RATIO {
            DateTimeKind::DateTime
        } else {
            DateTimeKind::Unknown
        }
    }

    pub fn is_pure_date(value: &str) -> bool {
        patterns().date.iter().any(|(re, _)| re.is_match(value.trim()))
    }

    pub fn is_pure_time(value: &str) -> bool {
        patterns().time.is_match(value.trim())
    }

    pub fn is_combined(value: &str) -> bool {
        patterns().combined.iter().any(|(re, _)| re.is_match(value.trim()))
    }

    /// 日在前判定: 分隔符为 '.' 或首组不以 19/20 开头
    pub fn is_day_first(value: &str) -> bool {
        let v = value.trim();
        let leading: String = v.chars().take_while(|c| c.is_ascii_digit()).collect();
        let separator = v.chars().find(|c| !c.is_ascii_digit());
        separator == Some('.') || !(leading.starts_with("19") || leading.starts_with("20"))
    }

    /// 解析日期（纯日期或组合值的日期部分）
    pub fn parse_date(value: &str) -> Option<NaiveDate> {
        let v = value.trim();
        let p = patterns();
        for (re, layout) in p.date.iter().chain(p.combined.iter()) {
            if let Some(caps) = re.captures(v) {
                return date_from_captures(&caps, *layout, v);
            }
        }
        None
    }

    /// 解析时间（纯时间或组合值的时间部分）
    pub fn parse_time(value: &str) -> Option<NaiveTime> {
        let v = value.trim();
        let p = patterns();
        if let Some(caps) = p.time.captures(v) {
            return time_from_captures(&caps, 1);
        }
        for (re, layout) in p.combined.iter() {
            if let Some(caps) = re.captures(v) {
                let offset = if *layout == DateLayout::Compact { 2 } else { 4 };
                return time_from_captures(&caps, offset);
            }
        }
        None
    }

    /// 组合值 → (日期, 时间)
    pub fn split_datetime(value: &str) -> Option<(NaiveDate, NaiveTime)> {
        if !Self::is_combined(value) {
            return None;
        }
        Some((Self::parse_date(value)?, Self::parse_time(value)?))
    }

    pub fn format_date(value: &str) -> Option<String> {
        Self::parse_date(value).map(|d| d.format(ISO_DATE_FORMAT).to_string())
    }

    pub fn format_time(value: &str) -> Option<String> {
        Self::parse_time(value).map(|t| t.format(TIME_FORMAT).to_string())
    }

    /// 规范化一列
    ///
    /// - 纯日期: 逐格转 ISO，无法解析保留原值
    /// - 纯时间: 不动
    /// - 组合: 日期留在原列，时间写入配对列（entry_date → entry_time，
    ///   其余 {field}_time）；原列本身为时间列时反向处理
    ///
    /// # 返回
    /// - None: 列不存在或无非空值
    pub fn separate(frame: &mut Frame, field: &str) -> Option<SeparationOutcome> {
        let values = frame.column(field)?.to_vec();
        let kind = Self::classify(&values);
        let mut outcome = SeparationOutcome {
            field: field.to_string(),
            kind,
            companion_column: None,
            parse_failures: 0,
        };

        match kind {
            DateTimeKind::Unknown => {
                if values.iter().all(|v| v.trim().is_empty()) {
                    return None;
                }
            }
            DateTimeKind::Time => {}
            DateTimeKind::Date => {
                let mut out = Vec::with_capacity(values.len());
                for v in &values {
                    match Self::format_date(v) {
                        Some(iso) => out.push(iso),
                        None => {
                            if !v.trim().is_empty() {
                                outcome.parse_failures += 1;
                            }
                            out.push(v.clone());
                        }
                    }
                }
                frame.set_column(field, out);
            }
            DateTimeKind::DateTime => {
                let mut dates = Vec::with_capacity(values.len());
                let mut times = Vec::with_capacity(values.len());
                for v in &values {
                    match Self::split_datetime(v) {
                        Some((d, t)) => {
                            dates.push(d.format(ISO_DATE_FORMAT).to_string());
                            times.push(t.format(TIME_FORMAT).to_string());
                        }
                        None => {
                            // 混入的纯日期仍可解析
                            match Self::format_date(v) {
                                Some(iso) => dates.push(iso),
                                None => {
                                    if !v.trim().is_empty() {
                                        outcome.parse_failures += 1;
                                    }
                                    dates.push(v.clone());
                                }
                            }
                            times.push(String::new());
                        }
                    }
                }

                if is_time_field(field) {
                    let companion = paired_date_column(field);
                    frame.set_column(field, times);
                    if !frame.has_values(&companion) {
                        frame.insert_column_after(field, &companion, dates);
                        outcome.companion_column = Some(companion);
                    }
                } else {
                    let companion = free_column_name(frame, &paired_time_column(field));
                    frame.set_column(field, dates);
                    frame.insert_column_after(field, &companion, times);
                    outcome.companion_column = Some(companion);
                }
            }
        }

        debug!(
            field = field,
            kind = ?outcome.kind,
            companion = ?outcome.companion_column,
            failures = outcome.parse_failures,
            "日期列规范化完成"
        );
        Some(outcome)
    }
}

fn match_ratio(samples: &[&str], pred: fn(&str) -> bool) -> f64 {
    let hits = samples.iter().filter(|s| pred(s)).count();
    hits as f64 / samples.len() as f64
}

fn date_from_captures(caps: &regex::Captures<'_>, layout: DateLayout, raw: &str) -> Option<NaiveDate> {
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    match layout {
        DateLayout::YearFirst => {
            NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)
        }
        DateLayout::YearLast => {
            let (a, b, year) = (num(1)?, num(2)?, num(3)? as i32);
            // 日在前优先，非法时回退月在前
            NaiveDate::from_ymd_opt(year, b, a).or_else(|| NaiveDate::from_ymd_opt(year, a, b))
        }
        DateLayout::Compact => {
            let digits = caps.get(1)?.as_str();
            let part = |r: std::ops::Range<usize>| digits.get(r).and_then(|s| s.parse::<u32>().ok());
            let day_first = || NaiveDate::from_ymd_opt(part(4..8)? as i32, part(2..4)?, part(0..2)?);
            let year_first = || NaiveDate::from_ymd_opt(part(0..4)? as i32, part(4..6)?, part(6..8)?);
            if DateTimeNormalizer::is_day_first(raw) {
                day_first().or_else(year_first)
            } else {
                year_first().or_else(day_first)
            }
        }
    }
}

fn time_from_captures(caps: &regex::Captures<'_>, offset: usize) -> Option<NaiveTime> {
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    NaiveTime::from_hms_opt(num(offset)?, num(offset + 1)?, num(offset + 2).unwrap_or(0))
}

fn is_time_field(field: &str) -> bool {
    field.ends_with("_time")
}

/// 领域配对: entry_date ↔ entry_time
fn paired_time_column(field: &str) -> String {
    match field {
        "entry_date" => "entry_time".to_string(),
        other => format!("{}_time", other),
    }
}

fn paired_date_column(field: &str) -> String {
    match field {
        "entry_time" => "entry_date".to_string(),
        other => format!("{}_date", other.trim_end_matches("_time")),
    }
}

/// 目标列已存在且有值时追加 _N 后缀
fn free_column_name(frame: &Frame, base: &str) -> String {
    if !frame.has_values(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !frame.has_column(candidate))
        .unwrap_or_else(|| base.to_string())
}
