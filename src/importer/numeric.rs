// ==========================================
// 会计数据导入管道 - 数值规范化 (C1)
// ==========================================
// 职责: 欧式/美式分隔符、括号负数 → Decimal
//       借/贷/金额/方向标志派生
// 红线: 从不取绝对值，符号保留
// 类型单元格（解析器标记为数值）已是规范十进制，不做分隔符判定
// ==========================================

use crate::domain::frame::Frame;
use regex::Regex;
use rust_decimal::prelude::*;
use std::sync::OnceLock;

pub const AMOUNT: &str = "amount";
pub const DEBIT_AMOUNT: &str = "debit_amount";
pub const CREDIT_AMOUNT: &str = "credit_amount";
pub const INDICATOR: &str = "debit_credit_indicator";

/// 借方标志
pub const DEBIT_MARK: &str = "D";
/// 贷方标志（Haber）
pub const CREDIT_MARK: &str = "H";

fn paren_negative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^()]*\d[^()]*\)").expect("括号负数正则"))
}

fn canonical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("规范数值正则"))
}

// ==========================================
// NumericNormalizer
// ==========================================
pub struct NumericNormalizer;

impl NumericNormalizer {
    /// 任意单元格 → Decimal（无法解析时为 0）
    ///
    /// # 示例
    /// - "(1.234,56)" → -1234.56
    /// - "1,234,567.89" → 1234567.89
    /// - "100.005" → 100005（单个点后超过两位视为千分位）
    /// - "" → 0
    pub fn clean(value: &str) -> Decimal {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Decimal::ZERO;
        }

        let is_neg = paren_negative_re().is_match(trimmed);
        let kept: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
            .collect();

        let (sign, body) = match kept.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", kept.as_str()),
        };
        let canonical = format!("{}{}", sign, disambiguate_separators(body));

        if !canonical_re().is_match(&canonical) {
            return Decimal::ZERO;
        }
        let parsed = Decimal::from_str(&canonical).unwrap_or(Decimal::ZERO);
        if is_neg && parsed.is_sign_positive() {
            -parsed
        } else {
            parsed
        }
    }

    /// 空单元格保持为空，其余走 clean
    pub fn clean_optional(value: &str) -> Option<Decimal> {
        if value.trim().is_empty() {
            None
        } else {
            Some(Self::clean(value))
        }
    }

    /// 规范十进制文本（`-?\d+(\.\d+)?`）直接解析，否则 None
    pub fn parse_canonical(value: &str) -> Option<Decimal> {
        let trimmed = value.trim();
        if !canonical_re().is_match(trimmed) {
            return None;
        }
        Decimal::from_str(trimmed).ok()
    }

    /// 按单元格类型清洗: 数值单元格原样取值，文本单元格走 clean
    pub fn clean_cell(value: &str, numeric: bool) -> Decimal {
        if numeric {
            if let Some(parsed) = Self::parse_canonical(value) {
                return parsed;
            }
        }
        Self::clean(value)
    }

    pub fn clean_optional_cell(value: &str, numeric: bool) -> Option<Decimal> {
        if value.trim().is_empty() {
            None
        } else {
            Some(Self::clean_cell(value, numeric))
        }
    }

    /// 固定小数位输出（四舍五入，远离零）
    pub fn format(value: Decimal, scale: u32) -> String {
        let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        if rounded.is_zero() {
            rounded = Decimal::ZERO;
        }
        rounded.rescale(scale);
        rounded.to_string()
    }

    /// 清洗整列并以两位小数输出（空值 → 0.00），之后整列标记为数值
    pub fn clean_amount_column(frame: &mut Frame, name: &str) {
        let Some(values) = frame.column(name) else {
            return;
        };
        let cleaned: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(row, v)| Self::format(Self::clean_cell(v, frame.is_numeric(row, name)), 2))
            .collect();
        frame.set_column(name, cleaned);
        frame.mark_numeric(name);
    }

    /// 清洗整列为整数（空值保持为空）
    pub fn clean_integer_column(frame: &mut Frame, name: &str) {
        let Some(values) = frame.column(name) else {
            return;
        };
        let cleaned: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(row, v)| match Self::clean_optional_cell(v, frame.is_numeric(row, name)) {
                Some(d) => {
                    let whole = d.trunc();
                    if whole.is_zero() {
                        "0".to_string()
                    } else {
                        whole.normalize().to_string()
                    }
                }
                None => v.clone(),
            })
            .collect();
        frame.set_column(name, cleaned);
        frame.mark_numeric(name);
    }

    /// 科目号规范化: 去掉 ".0" 尾巴，整数值浮点 → 纯整数
    ///
    /// "4300.0" → "4300"；"572.000" → "572"；"4.3E+3" → "4300"；"430.01" 原样
    pub fn normalize_account(value: &str) -> String {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        if let Some(stripped) = trimmed.strip_suffix(".0") {
            if stripped.chars().all(|c| c.is_ascii_digit()) && !stripped.is_empty() {
                return stripped.to_string();
            }
        }
        let looks_float = trimmed.contains('.') || trimmed.contains('e') || trimmed.contains('E');
        if looks_float && trimmed.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
            if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    return format!("{}", f as i64);
                }
            }
        }
        trimmed.to_string()
    }

    /// 规范化既有方向标志（Debe/Haber/C/CR…）为 D/H，无法识别返回 None
    pub fn normalize_indicator(value: &str) -> Option<&'static str> {
        match crate::importer::text::normalize_text(value).as_str() {
            "D" | "DEBE" | "DEBITO" | "DEBIT" | "DR" | "CARGO" => Some(DEBIT_MARK),
            "H" | "HABER" | "CREDITO" | "CREDIT" | "CR" | "C" | "ABONO" => Some(CREDIT_MARK),
            _ => None,
        }
    }

    /// 借贷派生规则
    ///
    /// - 借贷存在、金额缺失: amount = debit − credit
    /// - 方向标志空缺的行: 借贷齐全时按零值模式派生，否则按金额符号派生
    /// - 既有方向标志统一为 D/H
    pub fn derive_debit_credit(frame: &mut Frame) -> DerivationOutcome {
        let mut outcome = DerivationOutcome::default();
        let has_debit_credit = frame.has_values(DEBIT_AMOUNT) && frame.has_values(CREDIT_AMOUNT);

        if !frame.has_values(AMOUNT) && has_debit_credit {
            let amounts: Vec<String> = (0..frame.len())
                .map(|row| {
                    let (d, c) = debit_credit_at(frame, row);
                    Self::format(d - c, 2)
                })
                .collect();
            frame.set_column(AMOUNT, amounts);
            frame.mark_numeric(AMOUNT);
            outcome.amount_derived = true;
        }

        if !frame.has_values(AMOUNT) && !has_debit_credit {
            return outcome;
        }

        let existing: Vec<String> = frame
            .column(INDICATOR)
            .map(|c| c.to_vec())
            .unwrap_or_else(|| vec![String::new(); frame.len()]);

        let mut indicators = Vec::with_capacity(frame.len());
        for (row, current) in existing.iter().enumerate() {
            if let Some(mark) = Self::normalize_indicator(current) {
                indicators.push(mark.to_string());
                continue;
            }
            if !current.trim().is_empty() {
                indicators.push(current.trim().to_string());
                continue;
            }
            let mark = if has_debit_credit {
                let (d, c) = debit_credit_at(frame, row);
                indicator_from_pattern(d, c)
            } else {
                let amount = Self::clean_cell(
                    frame.cell(row, AMOUNT).unwrap_or(""),
                    frame.is_numeric(row, AMOUNT),
                );
                indicator_from_sign(amount)
            };
            indicators.push(mark.to_string());
            outcome.indicators_filled += 1;
        }
        frame.set_column(INDICATOR, indicators);
        outcome
    }
}

/// 借贷派生结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationOutcome {
    pub amount_derived: bool,
    pub indicators_filled: usize,
}

fn debit_credit_at(frame: &Frame, row: usize) -> (Decimal, Decimal) {
    let cell = |name: &str| {
        NumericNormalizer::clean_cell(frame.cell(row, name).unwrap_or(""), frame.is_numeric(row, name))
    };
    (cell(DEBIT_AMOUNT), cell(CREDIT_AMOUNT))
}

/// 零值模式: 贷方为 0 → D；借方为 0 且贷方非 0 → H；两者皆非 0 → 按差额符号
fn indicator_from_pattern(debit: Decimal, credit: Decimal) -> &'static str {
    if credit.is_zero() {
        DEBIT_MARK
    } else if debit.is_zero() {
        CREDIT_MARK
    } else {
        indicator_from_sign(debit - credit)
    }
}

fn indicator_from_sign(amount: Decimal) -> &'static str {
    if amount.is_sign_negative() && !amount.is_zero() {
        CREDIT_MARK
    } else {
        DEBIT_MARK
    }
}

/// 千分位 / 小数点判定（输入只含数字、'.'、','）
fn disambiguate_separators(body: &str) -> String {
    let has_comma = body.contains(',');
    let has_dot = body.contains('.');

    match (has_comma, has_dot) {
        (true, true) => {
            // 最右侧的分隔符是小数点
            let last_comma = body.rfind(',').unwrap_or(0);
            let last_dot = body.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                body.replace('.', "").replace(',', ".")
            } else {
                body.replace(',', "")
            }
        }
        (true, false) => {
            let trailing = body.rsplit(',').next().unwrap_or("");
            if trailing.len() <= 2 {
                let idx = body.rfind(',').unwrap_or(0);
                format!("{}.{}", body[..idx].replace(',', ""), trailing)
            } else {
                body.replace(',', "")
            }
        }
        (false, true) => {
            // 尾组不超过两位才是小数点，否则所有点都是千分位
            let last = body.rsplit('.').next().unwrap_or("");
            if last.len() <= 2 {
                let idx = body.rfind('.').unwrap_or(0);
                format!("{}.{}", body[..idx].replace('.', ""), last)
            } else {
                body.replace('.', "")
            }
        }
        (false, false) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parenthesized_european() {
        assert_eq!(NumericNormalizer::clean("(1.234,56)"), d("-1234.56"));
    }

    #[test]
    fn test_us_style() {
        assert_eq!(NumericNormalizer::clean("1,234,567.89"), d("1234567.89"));
    }

    #[test]
    fn test_single_separator_rules() {
        assert_eq!(NumericNormalizer::clean("100,00"), d("100.00"));
        assert_eq!(NumericNormalizer::clean("1,234"), d("1234"));
        assert_eq!(NumericNormalizer::clean("1.234"), d("1234"));
        assert_eq!(NumericNormalizer::clean("1.234.567"), d("1234567"));
        assert_eq!(NumericNormalizer::clean("1.234.567,8"), d("1234567.8"));
        assert_eq!(NumericNormalizer::clean("12.5"), d("12.5"));
    }

    #[test]
    fn test_text_separator_table() {
        let cases = [
            // 单个点，尾组超过两位 → 千分位
            ("100.005", "100005"),
            ("0.125", "125"),
            ("1234.5678", "12345678"),
            ("1.234", "1234"),
            // 单个点，尾组不超过两位 → 小数点
            ("100.05", "100.05"),
            ("7.5", "7.5"),
            // 多个点 → 千分位
            ("1.234.567", "1234567"),
            ("12.345.678.901", "12345678901"),
            ("1.234.56", "1234.56"),
            // 混合分隔符
            ("1.234,56", "1234.56"),
            ("-1.234,56", "-1234.56"),
            ("1,234.56", "1234.56"),
            // 括号负数
            ("(1.500,00)", "-1500.00"),
            ("(100.005)", "-100005"),
            // 尾随负号不识别
            ("100-", "0"),
        ];
        for (raw, expected) in cases {
            assert_eq!(NumericNormalizer::clean(raw), d(expected), "{}", raw);
        }
    }

    #[test]
    fn test_typed_cells_skip_separator_rules() {
        let cases = [
            ("100.005", "100.005"),
            ("0.125", "0.125"),
            ("-1234.5678", "-1234.5678"),
            ("1500", "1500"),
        ];
        for (raw, expected) in cases {
            assert_eq!(NumericNormalizer::clean_cell(raw, true), d(expected), "{}", raw);
            assert_eq!(NumericNormalizer::parse_canonical(raw), Some(d(expected)));
        }
        // 标记为数值但文本不规范时仍按文本规则
        assert_eq!(NumericNormalizer::clean_cell("1.234,56", true), d("1234.56"));
        assert_eq!(NumericNormalizer::clean_cell("100.005", false), d("100005"));
        assert_eq!(NumericNormalizer::parse_canonical("1.234,56"), None);
    }

    #[test]
    fn test_amount_column_respects_numeric_marks() {
        let mut frame = Frame::from_typed_rows(
            vec![AMOUNT.to_string()],
            vec![vec!["100.005".into()], vec!["100.005".into()], vec!["".into()]],
            vec![vec![true], vec![false], vec![false]],
        );
        NumericNormalizer::clean_amount_column(&mut frame, AMOUNT);
        assert_eq!(frame.column(AMOUNT).unwrap(), &["100.01", "100005.00", "0.00"]);
        assert!((0..3).all(|row| frame.is_numeric(row, AMOUNT)));

        // 再次清洗不改变结果
        NumericNormalizer::clean_amount_column(&mut frame, AMOUNT);
        assert_eq!(frame.column(AMOUNT).unwrap(), &["100.01", "100005.00", "0.00"]);
    }

    #[test]
    fn test_integer_column_keeps_blanks() {
        let mut frame = Frame::from_typed_rows(
            vec!["line_number".to_string()],
            vec![vec!["3".into()], vec!["".into()], vec!["1.000".into()]],
            vec![vec![true], vec![false], vec![false]],
        );
        NumericNormalizer::clean_integer_column(&mut frame, "line_number");
        assert_eq!(frame.column("line_number").unwrap(), &["3", "", "1000"]);
    }

    #[test]
    fn test_empty_and_garbage_become_zero() {
        assert_eq!(NumericNormalizer::clean(""), Decimal::ZERO);
        assert_eq!(NumericNormalizer::clean("   "), Decimal::ZERO);
        assert_eq!(NumericNormalizer::clean("n/a"), Decimal::ZERO);
        assert_eq!(NumericNormalizer::clean("2024-01-01"), Decimal::ZERO);
    }

    #[test]
    fn test_currency_symbols_and_sign() {
        assert_eq!(NumericNormalizer::clean("€ -1.500,00"), d("-1500.00"));
        assert_eq!(NumericNormalizer::clean("($250.00)"), d("-250.00"));
    }

    #[test]
    fn test_clean_is_idempotent_through_format() {
        for raw in ["(1.234,56)", "1,234,567.89", "100,00", "-0,5", "7"] {
            let once = NumericNormalizer::clean(raw);
            let twice = NumericNormalizer::clean(&NumericNormalizer::format(once, 2));
            assert_eq!(once, twice, "{}", raw);
        }
    }

    #[test]
    fn test_format_rounds_half_away_from_zero() {
        assert_eq!(NumericNormalizer::format(d("100.005"), 2), "100.01");
        assert_eq!(NumericNormalizer::format(d("-100.005"), 2), "-100.01");
        assert_eq!(NumericNormalizer::format(d("-0.001"), 2), "0.00");
        assert_eq!(NumericNormalizer::format(d("5"), 2), "5.00");
    }

    #[test]
    fn test_normalize_account() {
        assert_eq!(NumericNormalizer::normalize_account("4300.0"), "4300");
        assert_eq!(NumericNormalizer::normalize_account("572.000"), "572");
        assert_eq!(NumericNormalizer::normalize_account("4.3E+3"), "4300");
        assert_eq!(NumericNormalizer::normalize_account("430.01"), "430.01");
        assert_eq!(NumericNormalizer::normalize_account("A-100"), "A-100");
    }

    #[test]
    fn test_derive_amount_from_debit_credit() {
        let mut frame = Frame::from_columns(vec![
            (DEBIT_AMOUNT.to_string(), vec!["100.00".into(), "0.00".into()]),
            (CREDIT_AMOUNT.to_string(), vec!["0.00".into(), "40.00".into()]),
        ]);
        let outcome = NumericNormalizer::derive_debit_credit(&mut frame);

        assert!(outcome.amount_derived);
        assert_eq!(frame.column(AMOUNT).unwrap(), &["100.00", "-40.00"]);
        assert_eq!(frame.column(INDICATOR).unwrap(), &["D", "H"]);
    }

    #[test]
    fn test_indicator_from_amount_sign() {
        let mut frame = Frame::from_columns(vec![(
            AMOUNT.to_string(),
            vec!["10.00".into(), "-3.00".into(), "0.00".into()],
        )]);
        let outcome = NumericNormalizer::derive_debit_credit(&mut frame);

        assert!(!outcome.amount_derived);
        assert_eq!(outcome.indicators_filled, 3);
        assert_eq!(frame.column(INDICATOR).unwrap(), &["D", "H", "D"]);
        // 符号保留
        assert_eq!(frame.cell(1, AMOUNT), Some("-3.00"));
    }

    #[test]
    fn test_existing_indicator_normalized() {
        let mut frame = Frame::from_columns(vec![
            (AMOUNT.to_string(), vec!["10.00".into(), "10.00".into()]),
            (INDICATOR.to_string(), vec!["Haber".into(), "".into()]),
        ]);
        NumericNormalizer::derive_debit_credit(&mut frame);
        assert_eq!(frame.column(INDICATOR).unwrap(), &["H", "D"]);
    }
}
