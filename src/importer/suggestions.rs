// ==========================================
// 会计数据导入管道 - 关键字规则与未映射列分析
// ==========================================
// 职责: 关键字规则匹配（自动映射共用）
//       未映射列: 样本 ≤5、dtype、统计、≤3 条建议
// ==========================================

use crate::domain::frame::Frame;
use crate::domain::mapping::{ColumnMapping, ColumnStatistics, FieldSuggestion, UnmappedColumn};
use crate::importer::datetime::DateTimeNormalizer;
use crate::importer::text::{contains_all, normalize_text};
use std::collections::HashSet;

pub const MAX_SAMPLES: usize = 5;
pub const MAX_SUGGESTIONS: usize = 3;

// ==========================================
// KeywordRule - 列名关键字规则
// ==========================================
// aliases: 规范化后完全相等（置信度 1.0）
// patterns: 规范化后包含全部关键字（关键字越多越具体）
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
    pub patterns: &'static [&'static [&'static str]],
}

/// 一次规则命中
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub field: &'static str,
    pub confidence: f64,
    pub reason: String,
}

impl KeywordRule {
    /// 对规范化列名求值
    pub fn evaluate(&self, normalized: &str) -> Option<RuleMatch> {
        let canonical = self.field.to_ascii_uppercase();
        if normalized == canonical || normalized.replace(' ', "_") == canonical {
            return Some(RuleMatch {
                field: self.field,
                confidence: 1.0,
                reason: "列名与规范字段同名".to_string(),
            });
        }
        if self.aliases.iter().any(|a| *a == normalized) {
            return Some(RuleMatch {
                field: self.field,
                confidence: 0.95,
                reason: format!("列名为常用别名 '{}'", normalized),
            });
        }
        self.patterns
            .iter()
            .filter(|tokens| contains_all(normalized, tokens))
            .max_by_key(|tokens| tokens.len())
            .map(|tokens| RuleMatch {
                field: self.field,
                confidence: (0.5 + 0.15 * tokens.len() as f64).min(0.9),
                reason: format!("列名包含关键字 {}", tokens.join("+")),
            })
    }
}

/// 对一组规则求值，按置信度降序（同分保持表顺序）
pub fn rank_rules(normalized: &str, rules: &[KeywordRule]) -> Vec<RuleMatch> {
    let mut matches: Vec<RuleMatch> = rules.iter().filter_map(|r| r.evaluate(normalized)).collect();
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches
}

/// 贪心分配: 所有 (列, 字段, 置信度) 候选按置信度排序后依次写入，
/// 源列与规范字段各只占用一次
pub fn assign_by_rules(columns: &[String], rules: &[KeywordRule], mapping: &mut ColumnMapping) {
    let mut candidates: Vec<(usize, usize, RuleMatch)> = Vec::new();
    for (col_idx, column) in columns.iter().enumerate() {
        let normalized = normalize_text(column);
        if normalized.is_empty() {
            continue;
        }
        for (rank, m) in rank_rules(&normalized, rules).into_iter().enumerate() {
            candidates.push((col_idx, rank, m));
        }
    }
    candidates.sort_by(|a, b| {
        b.2.confidence
            .total_cmp(&a.2.confidence)
            .then(a.1.cmp(&b.1))
            .then(a.0.cmp(&b.0))
    });

    for (col_idx, _, m) in candidates {
        mapping.insert(crate::domain::mapping::MappingEntry {
            source_column: columns[col_idx].clone(),
            canonical_field: m.field.to_string(),
            confidence: m.confidence,
            rationale: m.reason,
            origin: crate::domain::mapping::MappingOrigin::Auto,
        });
    }
}

// ==========================================
// 未映射列分析
// ==========================================

/// 分析未映射列
///
/// # 参数
/// - frame: 源数据帧（表头已确定）
/// - mapping: 当前映射
/// - rules: 建议规则表
/// - skip: 额外排除的列（如科目层级列）
///
/// # 说明
/// - 全空列不需要决策，不计入
pub fn analyze_unmapped(
    frame: &Frame,
    mapping: &ColumnMapping,
    rules: &[KeywordRule],
    skip: &HashSet<String>,
) -> Vec<UnmappedColumn> {
    let taken: HashSet<&str> = mapping.entries.iter().map(|e| e.canonical_field.as_str()).collect();

    frame
        .column_names()
        .iter()
        .filter(|name| !mapping.is_mapped_source(name) && !skip.contains(*name))
        .filter(|name| frame.has_values(name))
        .map(|name| {
            let values = frame.column(name).unwrap_or(&[]);
            UnmappedColumn {
                column_name: name.clone(),
                sample_data: sample(values),
                dtype: infer_dtype(values).to_string(),
                statistics: statistics(values),
                suggestions: suggest(name, values, rules, &taken),
            }
        })
        .collect()
}

fn sample(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .take(MAX_SAMPLES)
        .map(|v| v.to_string())
        .collect()
}

fn statistics(values: &[String]) -> ColumnStatistics {
    let non_null: Vec<&str> = values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    let unique: HashSet<&str> = non_null.iter().copied().collect();
    ColumnStatistics {
        count: values.len(),
        unique: unique.len(),
        non_null: non_null.len(),
    }
}

/// 源列类型推断: integer / decimal / date / datetime / time / string / empty
pub fn infer_dtype(values: &[String]) -> &'static str {
    let non_null: Vec<&str> = values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    if non_null.is_empty() {
        return "empty";
    }
    let all = |pred: &dyn Fn(&str) -> bool| non_null.iter().all(|v| pred(v));

    if all(&|v: &str| v.trim_start_matches('-').chars().all(|c| c.is_ascii_digit())) {
        "integer"
    } else if all(&|v: &str| DateTimeNormalizer::is_pure_date(v)) {
        "date"
    } else if all(&|v: &str| DateTimeNormalizer::is_combined(v)) {
        "datetime"
    } else if all(&|v: &str| DateTimeNormalizer::is_pure_time(v)) {
        "time"
    } else if all(&|v: &str| looks_decimal(v)) {
        "decimal"
    } else {
        "string"
    }
}

fn looks_decimal(value: &str) -> bool {
    let stripped = value.trim_start_matches('(').trim_end_matches(')');
    !stripped.is_empty()
        && stripped.chars().any(|c| c.is_ascii_digit())
        && stripped
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | ' ' | '€' | '$'))
}

/// 建议: 列名规则命中 + dtype 提示，排除已占用字段，最多 3 条
fn suggest(
    column: &str,
    values: &[String],
    rules: &[KeywordRule],
    taken: &HashSet<&str>,
) -> Vec<FieldSuggestion> {
    let normalized = normalize_text(column);
    let mut out: Vec<FieldSuggestion> = rank_rules(&normalized, rules)
        .into_iter()
        .filter(|m| !taken.contains(m.field))
        .map(|m| FieldSuggestion {
            field: m.field.to_string(),
            reason: m.reason,
            confidence: m.confidence,
        })
        .collect();

    let dtype_hint: &[&str] = match infer_dtype(values) {
        "date" | "datetime" => &["entry_date", "posting_date", "approved_date"],
        "time" => &["entry_time"],
        "decimal" => &["amount", "debit_amount", "credit_amount"],
        _ => &[],
    };
    for field in dtype_hint {
        let known = rules.iter().any(|r| r.field == *field);
        if known && !taken.contains(field) && !out.iter().any(|s| s.field == *field) {
            out.push(FieldSuggestion {
                field: field.to_string(),
                reason: "按数据类型推断".to_string(),
                confidence: 0.3,
            });
        }
    }

    out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    out.truncate(MAX_SUGGESTIONS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &[KeywordRule] = &[
        KeywordRule {
            field: "entry_date",
            aliases: &["FECHA"],
            patterns: &[&["FECHA"]],
        },
        KeywordRule {
            field: "posting_date",
            aliases: &[],
            patterns: &[&["FECHA", "CONTAB"]],
        },
        KeywordRule {
            field: "amount",
            aliases: &["IMPORTE"],
            patterns: &[&["IMPORTE"]],
        },
    ];

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_more_specific_pattern_ranks_first() {
        let ranked = rank_rules("FECHA CONTABLE", RULES);
        assert_eq!(ranked[0].field, "posting_date");
        assert_eq!(ranked[1].field, "entry_date");
    }

    #[test]
    fn test_canonical_name_matches_exactly() {
        let m = RULES[2].evaluate(&normalize_text("amount")).unwrap();
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn test_assign_is_greedy_and_unique() {
        let columns = vec![s("Fecha"), s("Fecha contable"), s("Importe")];
        let mut mapping = ColumnMapping::default();
        assign_by_rules(&columns, RULES, &mut mapping);

        assert_eq!(mapping.source_for("entry_date"), Some("Fecha"));
        assert_eq!(mapping.source_for("posting_date"), Some("Fecha contable"));
        assert_eq!(mapping.source_for("amount"), Some("Importe"));
        assert!(mapping.has_unique_targets());
    }

    #[test]
    fn test_analyze_unmapped_reports_samples_and_suggestions() {
        let frame = Frame::from_columns(vec![
            (s("Fecha"), vec![s("01/01/2024"); 8]),
            (s("Valor"), (0..8).map(|i| format!("{},50", i)).collect()),
            (s("Vacia"), vec![String::new(); 8]),
        ]);
        let mut mapping = ColumnMapping::default();
        assign_by_rules(&[s("Fecha")], RULES, &mut mapping);

        let unmapped = analyze_unmapped(&frame, &mapping, RULES, &HashSet::new());
        assert_eq!(unmapped.len(), 1);
        let valor = &unmapped[0];
        assert_eq!(valor.column_name, "Valor");
        assert_eq!(valor.sample_data.len(), MAX_SAMPLES);
        assert_eq!(valor.dtype, "decimal");
        assert_eq!(valor.statistics.non_null, 8);
        assert_eq!(valor.suggestions[0].field, "amount");
    }

    #[test]
    fn test_infer_dtype() {
        assert_eq!(infer_dtype(&[s("1"), s("-2")]), "integer");
        assert_eq!(infer_dtype(&[s("2024-01-01")]), "date");
        assert_eq!(infer_dtype(&[s("2024-01-01 10:00:00")]), "datetime");
        assert_eq!(infer_dtype(&[s("1.234,5")]), "decimal");
        assert_eq!(infer_dtype(&[s("abc")]), "string");
        assert_eq!(infer_dtype(&[s(" ")]), "empty");
    }
}
