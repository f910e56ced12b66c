// ==========================================
// 会计数据导入管道 - 目录类型转换 (C3)
// ==========================================
// 职责: 按字段目录的 type 强制转换帧内列
// 红线: 幂等（两次转换结果与一次相同）
//       数值列转换后整列标记为数值，再次转换不重新判定分隔符
// ==========================================

use crate::domain::catalog::{FieldDefinition, FieldType};
use crate::domain::frame::Frame;
use crate::importer::datetime::DateTimeNormalizer;
use crate::importer::numeric::NumericNormalizer;

pub struct TypeTransformer;

impl TypeTransformer {
    /// 转换帧中所有出现在目录里的列，返回被转换的列数
    pub fn transform(frame: &mut Frame, fields: &[&FieldDefinition]) -> usize {
        let mut touched = 0;
        for field in fields {
            let name = field.name.as_str();
            let Some(values) = frame.column(name) else {
                continue;
            };
            let coerced: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(row, v)| Self::coerce_cell(v, frame.is_numeric(row, name), &field.field_type))
                .collect();
            frame.set_column(name, coerced);
            if matches!(field.field_type, FieldType::Decimal { .. } | FieldType::Int) {
                frame.mark_numeric(name);
            }
            touched += 1;
        }
        touched
    }

    /// 文本单元格转换
    pub fn coerce(value: &str, field_type: &FieldType) -> String {
        Self::coerce_cell(value, false, field_type)
    }

    /// 单元格转换; numeric 为 true 时数值按规范十进制读取
    pub fn coerce_cell(value: &str, numeric: bool, field_type: &FieldType) -> String {
        match field_type {
            FieldType::Decimal { scale, .. } => match NumericNormalizer::clean_optional_cell(value, numeric) {
                Some(d) => NumericNormalizer::format(d, *scale),
                None => String::new(),
            },
            FieldType::Int => match NumericNormalizer::clean_optional_cell(value, numeric) {
                Some(d) => {
                    let floored = d.floor();
                    if floored.is_zero() {
                        "0".to_string()
                    } else {
                        floored.normalize().to_string()
                    }
                }
                None => String::new(),
            },
            FieldType::Date => DateTimeNormalizer::format_date(value).unwrap_or_default(),
            FieldType::Time => DateTimeNormalizer::format_time(value).unwrap_or_default(),
            FieldType::Bit => {
                if is_truthy(value) {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            FieldType::String { max_len } => {
                let trimmed = value.trim();
                if is_null_literal(trimmed) {
                    return String::new();
                }
                match max_len {
                    Some(n) => trimmed.chars().take(*n).collect(),
                    None => trimmed.to_string(),
                }
            }
            FieldType::Other(_) => value.to_string(),
        }
    }
}

fn is_null_literal(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "nan" | "none" | "null" | "nat")
}

/// 真值: 1 / true / yes / si / 非零数值 / 其他非空文本；假值: 0 / false / no / 空
fn is_truthy(value: &str) -> bool {
    let v = crate::importer::text::normalize_text(value);
    match v.as_str() {
        "" | "0" | "FALSE" | "NO" | "N" | "F" => false,
        "1" | "TRUE" | "YES" | "SI" | "S" | "Y" | "X" => true,
        _ if is_null_literal(&v) => false,
        _ => {
            let numeric = v.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'));
            if numeric {
                !NumericNormalizer::clean(&v).is_zero()
            } else {
                true
            }
        }
    }
}
