// ==========================================
// 会计数据导入管道 - Libro Diario 四阶段校验 (C7)
// ==========================================
// 阶段: 1 格式 / 2 标识符 / 3 期间 / 4 借贷平衡
// 规则: 四个阶段都执行（阶段是屏障，前序结果随报告带出）
// 行号: 从 1 开始，不含表头
// ==========================================

use crate::domain::frame::Frame;
use crate::domain::report::{CheckResult, PhaseReport, ValidationReport, MAX_VIOLATION_SAMPLES};
use crate::engine::period::Period;
use crate::importer::numeric::{NumericNormalizer, AMOUNT, CREDIT_AMOUNT, DEBIT_AMOUNT};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{info, instrument};

pub const REPORT_TYPE: &str = "libro_diario";

const JOURNAL_ENTRY_ID: &str = "journal_entry_id";
const LINE_NUMBER: &str = "line_number";
const ENTRY_DATE: &str = "entry_date";
const ENTRY_TIME: &str = "entry_time";
const POSTING_DATE: &str = "posting_date";

/// 借贷平衡容差
pub fn balance_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("ISO 日期正则"))
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?$").expect("时间正则"))
}

pub(crate) fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("数值正则"))
}

/// 单列格式规则
struct FormatRule {
    field: &'static str,
    pattern: fn() -> &'static Regex,
    /// 空单元格是否计为违规
    blank_is_invalid: bool,
    issue: &'static str,
}

const FORMAT_RULES: &[FormatRule] = &[
    FormatRule {
        field: POSTING_DATE,
        pattern: iso_date_re,
        blank_is_invalid: true,
        issue: "日期不是 YYYY-MM-DD",
    },
    FormatRule {
        field: ENTRY_DATE,
        pattern: iso_date_re,
        blank_is_invalid: true,
        issue: "日期不是 YYYY-MM-DD",
    },
    FormatRule {
        field: ENTRY_TIME,
        pattern: time_re,
        blank_is_invalid: false,
        issue: "时间不是 HH:MM[:SS]",
    },
    FormatRule {
        field: AMOUNT,
        pattern: number_re,
        blank_is_invalid: true,
        issue: "金额不是数值",
    },
    FormatRule {
        field: DEBIT_AMOUNT,
        pattern: number_re,
        blank_is_invalid: true,
        issue: "金额不是数值",
    },
    FormatRule {
        field: CREDIT_AMOUNT,
        pattern: number_re,
        blank_is_invalid: true,
        issue: "金额不是数值",
    },
];

pub struct JournalValidator;

impl JournalValidator {
    /// 执行全部四个阶段
    ///
    /// # 参数
    /// - frame: 规范化后的 Libro Diario（目录列）
    /// - period: "YYYY-MM" 或 "YYYY-MM-DD a YYYY-MM-DD"
    #[instrument(skip(frame), fields(rows = frame.len()))]
    pub fn validate(frame: &Frame, execution_id: &str, period: Option<&str>) -> ValidationReport {
        let phases = vec![
            Self::phase_format(frame),
            Self::phase_identifiers(frame),
            Self::phase_temporal(frame, period),
            Self::phase_integrity(frame),
        ];
        let report = ValidationReport::build(REPORT_TYPE, execution_id, period, frame.len(), phases);
        info!(
            execution_id,
            passed_phases = report.summary.passed_phases,
            failed_phases = report.summary.failed_phases,
            all_passed = report.summary.all_passed,
            "Libro Diario 校验完成"
        );
        report
    }

    // ==========================================
    // 阶段 1 - 格式
    // ==========================================
    pub fn phase_format(frame: &Frame) -> PhaseReport {
        let checks = FORMAT_RULES
            .iter()
            .map(|rule| {
                let name = format!("formato_{}", rule.field);
                if !frame.has_values(rule.field) {
                    return CheckResult::skipped(&name, Some(rule.field), "列不存在或全为空，跳过");
                }
                let mut check = CheckResult::new(&name, Some(rule.field));
                let re = (rule.pattern)();
                for (idx, value) in frame.column(rule.field).unwrap_or_default().iter().enumerate() {
                    let v = value.trim();
                    if v.is_empty() && !rule.blank_is_invalid {
                        continue;
                    }
                    check.total_checked += 1;
                    if v.is_empty() {
                        check.record(idx + 1, value, "空值");
                    } else if !re.is_match(v) {
                        check.record(idx + 1, value, rule.issue);
                    }
                }
                let message = format!("{} 行中 {} 行格式错误", check.total_checked, check.invalid_count);
                check.with_message(message)
            })
            .collect();
        PhaseReport::from_checks(1, "Validaciones de Formato", checks)
    }

    // ==========================================
    // 阶段 2 - 标识符
    // ==========================================
    pub fn phase_identifiers(frame: &Frame) -> PhaseReport {
        let mut checks = Vec::new();

        // journal_entry_id 必须存在
        let mut present = CheckResult::new("journal_entry_id_presente", Some(JOURNAL_ENTRY_ID));
        match frame.column(JOURNAL_ENTRY_ID).filter(|_| frame.has_values(JOURNAL_ENTRY_ID)) {
            Some(ids) => {
                for (idx, id) in ids.iter().enumerate() {
                    present.total_checked += 1;
                    if id.trim().is_empty() {
                        present.record(idx + 1, id, "分录号为空");
                    }
                }
                let message = format!("{} 行缺少分录号", present.invalid_count);
                present = present.with_message(message);
            }
            None => {
                present.is_valid = false;
                present.message = "缺少 journal_entry_id 列".to_string();
            }
        }
        checks.push(present);

        let groups = group_rows(frame, JOURNAL_ENTRY_ID);

        // 单行分录: 可疑但不判失败
        let single: Vec<&str> = groups
            .iter()
            .filter(|(_, rows)| rows.len() == 1)
            .map(|(id, _)| id.as_str())
            .collect();
        let single_check = CheckResult::new("asientos_una_linea", Some(JOURNAL_ENTRY_ID))
            .with_message(format!("{} 个分录只有一行（仅提示）", single.len()))
            .with_details(json!({
                "count": single.len(),
                "sampleIds": single.iter().take(MAX_VIOLATION_SAMPLES).collect::<Vec<_>>(),
            }));
        checks.push(single_check);

        // line_number 连续性（可选）
        if frame.has_values(LINE_NUMBER) {
            let lines = frame.column(LINE_NUMBER).unwrap_or_default();
            let mut check = CheckResult::new("secuencia_line_number", Some(LINE_NUMBER));
            for (id, rows) in &groups {
                check.total_checked += 1;
                let mut numbers: Vec<i64> = Vec::with_capacity(rows.len());
                let mut bad_value = None;
                for &r in rows {
                    match lines[r].trim().parse::<i64>() {
                        Ok(n) => numbers.push(n),
                        Err(_) => {
                            bad_value = Some((r, lines[r].clone()));
                            break;
                        }
                    }
                }
                if let Some((r, value)) = bad_value {
                    check.record(r + 1, &value, format!("分录 {} 的行号不是整数", id));
                    continue;
                }
                numbers.sort_unstable();
                let consecutive = numbers.windows(2).all(|w| w[0].checked_add(1) == Some(w[1]));
                if !consecutive {
                    check.record(
                        rows[0] + 1,
                        id,
                        format!("分录 {} 的行号不连续: {:?}", id, numbers),
                    );
                }
            }
            let message = format!("{} 个分录中 {} 个行号不连续", check.total_checked, check.invalid_count);
            checks.push(check.with_message(message));
        } else {
            checks.push(CheckResult::skipped(
                "secuencia_line_number",
                Some(LINE_NUMBER),
                "line_number 未映射，跳过（可选检查）",
            ));
        }

        PhaseReport::from_checks(2, "Validaciones de Identificadores", checks)
    }

    // ==========================================
    // 阶段 3 - 期间
    // ==========================================
    pub fn phase_temporal(frame: &Frame, period: Option<&str>) -> PhaseReport {
        let raw = period.map(str::trim).filter(|p| !p.is_empty());
        let Some(raw) = raw else {
            let checks = vec![
                CheckResult::skipped("posting_date_en_periodo", Some(POSTING_DATE), "未提供期间，跳过"),
                CheckResult::skipped("entry_date_desde_inicio", Some(ENTRY_DATE), "未提供期间，跳过"),
            ];
            return PhaseReport::from_checks(3, "Validaciones Temporales", checks);
        };

        let Some(parsed) = Period::parse(raw) else {
            let mut check = CheckResult::new("formato_periodo", None);
            check.record(0, raw, "期间格式应为 YYYY-MM 或 YYYY-MM-DD a YYYY-MM-DD");
            return PhaseReport::from_checks(3, "Validaciones Temporales", vec![check]);
        };

        let period_details = json!({
            "periodStart": parsed.start.to_string(),
            "periodEnd": parsed.end.to_string(),
        });

        let mut checks = Vec::new();

        if frame.has_values(POSTING_DATE) {
            let mut check = CheckResult::new("posting_date_en_periodo", Some(POSTING_DATE));
            for (idx, value) in frame.column(POSTING_DATE).unwrap_or_default().iter().enumerate() {
                let Some(date) = parse_iso(value) else { continue };
                check.total_checked += 1;
                if !parsed.contains(date) {
                    check.record(idx + 1, value, format!("过账日期不在期间 {} 内", parsed));
                }
            }
            let message = format!("{} 行过账日期超出期间", check.invalid_count);
            checks.push(check.with_message(message).with_details(period_details.clone()));
        } else {
            checks.push(CheckResult::skipped("posting_date_en_periodo", Some(POSTING_DATE), "posting_date 为空，跳过"));
        }

        if frame.has_values(ENTRY_DATE) {
            let mut check = CheckResult::new("entry_date_desde_inicio", Some(ENTRY_DATE));
            let mut after_end = 0usize;
            for (idx, value) in frame.column(ENTRY_DATE).unwrap_or_default().iter().enumerate() {
                let Some(date) = parse_iso(value) else { continue };
                check.total_checked += 1;
                if date < parsed.start {
                    check.record(idx + 1, value, format!("录入日期早于期间开始 {}", parsed.start));
                } else if date > parsed.end {
                    after_end += 1;
                }
            }
            let mut details = period_details.clone();
            details["entryDatesAfterPeriodEnd"] = json!(after_end);
            let message = format!(
                "{} 行录入日期早于期间开始，{} 行晚于期间结束（允许，待人工确认）",
                check.invalid_count, after_end
            );
            checks.push(check.with_message(message).with_details(details));
        } else {
            checks.push(CheckResult::skipped("entry_date_desde_inicio", Some(ENTRY_DATE), "entry_date 为空，跳过"));
        }

        PhaseReport::from_checks(3, "Validaciones Temporales", checks)
    }

    // ==========================================
    // 阶段 4 - 借贷平衡
    // ==========================================
    pub fn phase_integrity(frame: &Frame) -> PhaseReport {
        let use_debit_credit = frame.has_values(DEBIT_AMOUNT) && frame.has_values(CREDIT_AMOUNT);
        if !use_debit_credit && !frame.has_values(AMOUNT) {
            let check = CheckResult::skipped("balance_por_asiento", None, "无金额列，跳过");
            return PhaseReport::from_checks(4, "Validaciones de Integridad", vec![check]);
        }

        let tolerance = balance_tolerance();
        let mut check = CheckResult::new("balance_por_asiento", Some(JOURNAL_ENTRY_ID));
        let (mut total_debit, mut total_credit) = (Decimal::ZERO, Decimal::ZERO);

        for (id, rows) in group_rows(frame, JOURNAL_ENTRY_ID) {
            let (mut debit, mut credit) = (Decimal::ZERO, Decimal::ZERO);
            for r in &rows {
                let (d, c) = if use_debit_credit {
                    (cell_decimal(frame, *r, DEBIT_AMOUNT), cell_decimal(frame, *r, CREDIT_AMOUNT))
                } else {
                    let amount = cell_decimal(frame, *r, AMOUNT);
                    if amount.is_sign_negative() {
                        (Decimal::ZERO, -amount)
                    } else {
                        (amount, Decimal::ZERO)
                    }
                };
                debit += d;
                credit += c;
            }
            total_debit += debit;
            total_credit += credit;
            check.total_checked += 1;

            let difference = (debit - credit).abs();
            if difference > tolerance {
                check.record(
                    rows[0] + 1,
                    &id,
                    format!("借方 {} 贷方 {} 差额 {}", debit, credit, difference),
                );
            }
        }

        let total_difference = total_debit - total_credit;
        let message = format!(
            "{} 个分录中 {} 个不平衡",
            check.total_checked, check.invalid_count
        );
        let details = json!({
            "totalDebit": NumericNormalizer::format(total_debit, 2),
            "totalCredit": NumericNormalizer::format(total_credit, 2),
            "totalDifference": NumericNormalizer::format(total_difference, 2),
            "unbalancedEntries": check.invalid_count,
            "basis": if use_debit_credit { "debit_credit" } else { "amount" },
        });
        let check = check.with_message(message).with_details(details);
        PhaseReport::from_checks(4, "Validaciones de Integridad", vec![check])
    }
}

/// 按列值分组（保持首次出现顺序，跳过空值）
fn group_rows(frame: &Frame, column: &str) -> Vec<(String, Vec<usize>)> {
    let Some(values) = frame.column(column) else {
        return Vec::new();
    };
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (row, value) in values.iter().enumerate() {
        let key = value.trim();
        if key.is_empty() {
            continue;
        }
        match index.get(key) {
            Some(&g) => groups[g].1.push(row),
            None => {
                index.insert(key, groups.len());
                groups.push((key.to_string(), vec![row]));
            }
        }
    }
    groups
}

/// 映射后的 CSV 已是规范十进制，优先原样读取
fn cell_decimal(frame: &Frame, row: usize, column: &str) -> Decimal {
    let value = frame.cell(row, column).unwrap_or("");
    NumericNormalizer::parse_canonical(value).unwrap_or_else(|| NumericNormalizer::clean(value))
}

fn parse_iso(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn frame(columns: &[&str], rows: &[&[&str]]) -> Frame {
        Frame::from_rows(
            columns.iter().map(|c| s(c)).collect(),
            rows.iter().map(|r| r.iter().map(|c| s(c)).collect()).collect(),
        )
    }

    #[test]
    fn test_format_phase_flags_bad_cells() {
        let f = frame(
            &["journal_entry_id", "entry_date", "amount"],
            &[&["1", "2024-12-01", "10.00"], &["1", "01/12/2024", "abc"]],
        );
        let phase = JournalValidator::phase_format(&f);
        assert!(!phase.is_phase_valid);
        let date = phase.check("formato_entry_date").unwrap();
        assert_eq!(date.invalid_count, 1);
        assert_eq!(date.samples[0].row, 2);
        assert!(phase.check("formato_posting_date").unwrap().skipped);
    }

    #[test]
    fn test_line_number_optional_when_absent() {
        let f = frame(&["journal_entry_id"], &[&["A"], &["A"]]);
        let phase = JournalValidator::phase_identifiers(&f);
        assert!(phase.is_phase_valid);
        let check = phase.check("secuencia_line_number").unwrap();
        assert!(check.skipped && check.optional);
    }

    #[test]
    fn test_line_number_gap_fails() {
        let f = frame(
            &["journal_entry_id", "line_number"],
            &[&["A", "1"], &["A", "3"], &["B", "5"], &["B", "6"]],
        );
        let phase = JournalValidator::phase_identifiers(&f);
        let check = phase.check("secuencia_line_number").unwrap();
        assert_eq!(check.invalid_count, 1);
        assert_eq!(check.samples[0].value, "A");
        // 单行分录仅提示
        assert!(phase.check("asientos_una_linea").unwrap().is_valid);
    }

    #[test]
    fn test_line_number_at_integer_limit() {
        let max = i64::MAX.to_string();
        let below = (i64::MAX - 1).to_string();
        let f = frame(
            &["journal_entry_id", "line_number"],
            &[
                &["A", max.as_str()],
                &["A", max.as_str()],
                &["B", below.as_str()],
                &["B", max.as_str()],
            ],
        );
        let phase = JournalValidator::phase_identifiers(&f);
        let check = phase.check("secuencia_line_number").unwrap();
        assert_eq!(check.total_checked, 2);
        assert_eq!(check.invalid_count, 1);
        assert_eq!(check.samples[0].value, "A");
    }

    #[test]
    fn test_posting_date_outside_month_flags_phase_three() {
        let f = frame(
            &["journal_entry_id", "posting_date", "entry_date"],
            &[&["1", "2024-12-15", "2024-12-15"], &["2", "2025-01-02", "2025-01-02"]],
        );
        let phase = JournalValidator::phase_temporal(&f, Some("2024-12"));
        assert!(!phase.is_phase_valid);
        assert_eq!(phase.check("posting_date_en_periodo").unwrap().invalid_count, 1);

        let entry = phase.check("entry_date_desde_inicio").unwrap();
        assert!(entry.is_valid);
        assert_eq!(entry.details.as_ref().unwrap()["entryDatesAfterPeriodEnd"], 1);
    }

    #[test]
    fn test_entry_date_before_start_fails() {
        let f = frame(&["journal_entry_id", "entry_date"], &[&["1", "2024-11-30"]]);
        let phase = JournalValidator::phase_temporal(&f, Some("2024-12-01 a 2024-12-31"));
        assert_eq!(phase.check("entry_date_desde_inicio").unwrap().invalid_count, 1);
    }

    #[test]
    fn test_half_cent_difference_is_balanced() {
        let f = frame(
            &["journal_entry_id", "debit_amount", "credit_amount"],
            &[&["JE-1", "100", "0"], &["JE-1", "0", "100.005"]],
        );
        let phase = JournalValidator::phase_integrity(&f);
        assert!(phase.is_phase_valid);
        let details = phase.validations[0].details.as_ref().unwrap();
        assert_eq!(details["totalDebit"], "100.00");
    }

    #[test]
    fn test_unbalanced_from_signed_amounts() {
        let f = frame(
            &["journal_entry_id", "amount"],
            &[&["A", "100.00"], &["A", "-99.98"], &["B", "5.00"], &["B", "-5.00"]],
        );
        let phase = JournalValidator::phase_integrity(&f);
        assert!(!phase.is_phase_valid);
        let check = &phase.validations[0];
        assert_eq!(check.invalid_count, 1);
        assert_eq!(check.samples[0].value, "A");
    }

    #[test]
    fn test_report_runs_all_phases() {
        let f = frame(&["journal_entry_id", "amount"], &[&["A", "1.00"], &["A", "-1.00"]]);
        let report = JournalValidator::validate(&f, "e1", None);
        assert_eq!(report.phases.len(), 4);
        assert!(report.all_passed());
    }
}
