// ==========================================
// 会计数据导入管道 - Sumas y Saldos 自动映射 (C4)
// ==========================================
// 职责: 表头行检测（前 20 行内同时含 CUENTA 与 SALDO）
//       科目层级列 / 余额列 / 借贷发生额列识别
// ==========================================

use crate::domain::catalog::TrialBalanceCatalog;
use crate::domain::frame::Frame;
use crate::domain::mapping::{ColumnMapping, MappingEntry, MappingOrigin, MappingResult};
use crate::importer::file_parser::Grid;
use crate::importer::suggestions::{analyze_unmapped, KeywordRule};
use crate::importer::text::{contains_all, normalize_text};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// 表头检测最多扫描的行数
pub const HEADER_SCAN_ROWS: usize = 20;

pub const GL_ACCOUNT_NUMBER: &str = "gl_account_number";
pub const GL_ACCOUNT_NAME: &str = "gl_account_name";
pub const REPORTING_ACCOUNT: &str = "reporting_account";
pub const BEGINNING_BALANCE: &str = "period_beginning_balance";
pub const ENDING_BALANCE: &str = "period_ending_balance";
pub const ACTIVITY_DEBIT: &str = "period_activity_debit";
pub const ACTIVITY_CREDIT: &str = "period_activity_credit";

/// 必填字段
pub const REQUIRED_FIELDS: &[&str] = &[GL_ACCOUNT_NUMBER, ENDING_BALANCE];

/// 未映射列建议用规则表
pub const TRIAL_BALANCE_RULES: &[KeywordRule] = &[
    KeywordRule {
        field: GL_ACCOUNT_NUMBER,
        aliases: &["CUENTA", "CTA", "SUBCUENTA"],
        patterns: &[&["CUENTA"], &["CTA"]],
    },
    KeywordRule {
        field: GL_ACCOUNT_NAME,
        aliases: &["DESCRIPCION", "NOMBRE", "TITULO"],
        patterns: &[&["DESCRIPCION"], &["NOMBRE"], &["TITULO"]],
    },
    KeywordRule {
        field: REPORTING_ACCOUNT,
        aliases: &["CUENTA REPORTE", "AGRUPACION"],
        patterns: &[&["REPORT"], &["AGRUP"]],
    },
    KeywordRule {
        field: BEGINNING_BALANCE,
        aliases: &["SALDO INICIAL", "SALDO ANTERIOR", "SALDO APERTURA"],
        patterns: &[&["SALDO", "INICIAL"], &["SALDO", "ANTERIOR"], &["APERTURA"]],
    },
    KeywordRule {
        field: ENDING_BALANCE,
        aliases: &["SALDO FINAL", "SALDO"],
        patterns: &[&["SALDO", "FINAL"], &["SALDO"]],
    },
    KeywordRule {
        field: ACTIVITY_DEBIT,
        aliases: &["DEBE", "DEBITO", "SUMAS DEBE"],
        patterns: &[&["DEBE"], &["DEBITO"]],
    },
    KeywordRule {
        field: ACTIVITY_CREDIT,
        aliases: &["HABER", "CREDITO", "SUMAS HABER"],
        patterns: &[&["HABER"], &["CREDITO"]],
    },
];

fn dated_balance_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"SALDO.*?(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})").expect("余额日期正则")
    })
}

/// 在原始网格中定位表头行
///
/// # 返回
/// - Some(idx): 前 20 行内第一个同时含 CUENTA 与 SALDO 的行
pub fn detect_header_row(grid: &[Vec<String>]) -> Option<usize> {
    grid.iter().take(HEADER_SCAN_ROWS).position(|row| {
        let cells: Vec<String> = row.iter().map(|c| normalize_text(c)).collect();
        cells.iter().any(|c| c.contains("CUENTA")) && cells.iter().any(|c| c.contains("SALDO"))
    })
}

/// 由原始网格与表头行构造数据帧
///
/// - 表头之前的行丢弃
/// - 空白表头命名为 column_{n}，重复表头追加 _N
/// - 全空数据行跳过
/// - 数值标记随行保留
pub fn frame_from_grid(grid: &Grid, header_row: usize) -> Frame {
    let Some(header) = grid.rows.get(header_row) else {
        return Frame::default();
    };
    let columns = unique_headers(header);
    let (rows, flags): (Vec<Vec<String>>, Vec<Vec<bool>>) = grid
        .rows
        .iter()
        .enumerate()
        .skip(header_row + 1)
        .filter(|(_, row)| row.iter().any(|c| !c.trim().is_empty()))
        .map(|(idx, row)| (row.clone(), grid.numeric.get(idx).cloned().unwrap_or_default()))
        .unzip();
    Frame::from_typed_rows(columns, rows, flags)
}

pub fn unique_headers(header: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let base = match raw.trim() {
                "" => format!("column_{}", idx + 1),
                trimmed => trimmed.to_string(),
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

// ==========================================
// TrialBalanceMapper
// ==========================================
pub struct TrialBalanceMapper<'a> {
    catalog: &'a TrialBalanceCatalog,
}

impl<'a> TrialBalanceMapper<'a> {
    pub fn new(catalog: &'a TrialBalanceCatalog) -> Self {
        Self { catalog }
    }

    /// 自动映射（表头已定位）
    ///
    /// # 规则
    /// - 科目列: 列名含 CUENTA 或 CTA 且不含 '#'，至少 3 列；
    ///   恰好 3 列时 gl_account_number = 倒数第三列、无 reporting_account，
    ///   否则 gl_account_number = 倒数第二列、reporting_account = 最后一列
    /// - period_ending_balance: 首个同时含 SALDO 与 FINAL 的列；
    ///   没有时取最新的带日期 SALDO 列（至少两列带日期）
    /// - period_beginning_balance: 最早的 SALDO dd/mm/yyyy 列，否则 SALDO + INICIAL
    /// - 发生额: DEBE/DEBITO 与 HABER/CREDITO
    /// - gl_account_name: 含 DESCRIPCION/NOMBRE/TITULO 且未占用的列
    pub fn auto_map(&self, frame: &Frame, header_row: Option<usize>) -> MappingResult {
        let columns = frame.column_names();
        let normalized: Vec<String> = columns.iter().map(|c| normalize_text(c)).collect();
        let mut mapping = ColumnMapping::default();

        // 科目层级列
        let account_columns: Vec<usize> = normalized
            .iter()
            .enumerate()
            .filter(|(_, n)| (n.contains("CUENTA") || n.contains("CTA")) && !n.contains('#'))
            .map(|(i, _)| i)
            .collect();
        if account_columns.len() >= 3 {
            let count = account_columns.len();
            if count == 3 {
                self.put(&mut mapping, &columns[account_columns[0]], GL_ACCOUNT_NUMBER, 0.9, "三列科目层级的倒数第三列");
            } else {
                self.put(&mut mapping, &columns[account_columns[count - 2]], GL_ACCOUNT_NUMBER, 0.9, "科目层级的倒数第二列");
                self.put(&mut mapping, &columns[account_columns[count - 1]], REPORTING_ACCOUNT, 0.9, "科目层级的最后一列");
            }
        } else {
            warn!(found = account_columns.len(), "科目列少于 3 列，gl_account_number 需人工映射");
        }

        // 带日期的 SALDO 列（按日期升序）
        let mut dated: Vec<(NaiveDate, usize)> = normalized
            .iter()
            .enumerate()
            .filter_map(|(i, n)| balance_date(n).map(|d| (d, i)))
            .collect();
        dated.sort();

        // 期末余额
        let final_column = normalized.iter().position(|n| contains_all(n, &["SALDO", "FINAL"]));
        match final_column {
            Some(i) => self.put(&mut mapping, &columns[i], ENDING_BALANCE, 0.95, "列名含 SALDO + FINAL"),
            None if dated.len() >= 2 => {
                if let Some((_, i)) = dated.last() {
                    self.put(&mut mapping, &columns[*i], ENDING_BALANCE, 0.8, "最新日期的 SALDO 列");
                }
            }
            None => {}
        }

        // 期初余额
        if let Some((_, i)) = dated.first() {
            self.put(&mut mapping, &columns[*i], BEGINNING_BALANCE, 0.85, "最早日期的 SALDO 列");
        } else if let Some(i) = normalized.iter().position(|n| contains_all(n, &["SALDO", "INICIAL"])) {
            self.put(&mut mapping, &columns[i], BEGINNING_BALANCE, 0.9, "列名含 SALDO + INICIAL");
        }

        // 借贷发生额
        if let Some(i) = normalized.iter().position(|n| n.contains("DEBE") || n.contains("DEBITO")) {
            self.put(&mut mapping, &columns[i], ACTIVITY_DEBIT, 0.9, "列名含 DEBE/DEBITO");
        }
        if let Some(i) = normalized.iter().position(|n| n.contains("HABER") || n.contains("CREDITO")) {
            self.put(&mut mapping, &columns[i], ACTIVITY_CREDIT, 0.9, "列名含 HABER/CREDITO");
        }

        // 科目名称
        if let Some(i) = normalized.iter().enumerate().position(|(i, n)| {
            !mapping.is_mapped_source(&columns[i])
                && (n.contains("DESCRIPCION") || n.contains("NOMBRE") || n.contains("TITULO"))
        }) {
            self.put(&mut mapping, &columns[i], GL_ACCOUNT_NAME, 0.8, "列名含 DESCRIPCION/NOMBRE/TITULO");
        }

        // 科目层级中未选用的列不需要人工决策
        let hierarchy: HashSet<String> = account_columns.iter().map(|i| columns[*i].clone()).collect();
        let rules: Vec<KeywordRule> = TRIAL_BALANCE_RULES
            .iter()
            .filter(|r| self.catalog.contains(r.field))
            .copied()
            .collect();
        let unmapped = analyze_unmapped(frame, &mapping, &rules, &hierarchy);

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|f| mapping.source_for(f).is_none())
            .map(|f| f.to_string())
            .collect();

        info!(
            header_row = ?header_row,
            mapped = mapping.len(),
            unmapped = unmapped.len(),
            missing = ?missing,
            "Sumas y Saldos 自动映射完成"
        );

        MappingResult {
            mapping,
            unmapped_columns: unmapped,
            missing_required_fields: missing,
            header_row,
            source_columns: columns.to_vec(),
        }
    }

    fn put(&self, mapping: &mut ColumnMapping, source: &str, field: &str, confidence: f64, rationale: &str) {
        if !self.catalog.contains(field) {
            return;
        }
        let inserted = mapping.insert(MappingEntry {
            source_column: source.to_string(),
            canonical_field: field.to_string(),
            confidence,
            rationale: rationale.to_string(),
            origin: MappingOrigin::Auto,
        });
        if !inserted {
            debug!(source = source, field = field, "列或字段已占用，跳过");
        }
    }
}

/// "SALDO 31/12/2023" → 2023-12-31
fn balance_date(normalized: &str) -> Option<NaiveDate> {
    let caps = dated_balance_re().captures(normalized)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    NaiveDate::from_ymd_opt(num(3)? as i32, num(2)?, num(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn header_frame(columns: &[&str]) -> Frame {
        Frame::from_rows(row(columns), vec![vec!["1".to_string(); columns.len()]])
    }

    #[test]
    fn test_detect_header_row_skips_title_rows() {
        let grid = vec![
            row(&["EMPRESA DEMO S.L."]),
            row(&["Balance de Sumas y Saldos"]),
            row(&["Ejercicio 2024"]),
            row(&[""]),
            row(&["Cuenta", "Descripción", "Debe", "Haber", "Saldo Final"]),
            row(&["430", "Clientes", "100", "50", "50"]),
        ];
        assert_eq!(detect_header_row(&grid), Some(4));

        let frame = frame_from_grid(&Grid::from_text(grid), 4);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.column_names()[0], "Cuenta");
    }

    #[test]
    fn test_detect_header_row_limited_to_scan_window() {
        let mut grid: Vec<Vec<String>> = (0..25).map(|_| row(&["x"])).collect();
        grid.push(row(&["CUENTA", "SALDO"]));
        assert_eq!(detect_header_row(&grid), None);
    }

    #[test]
    fn test_unique_headers() {
        let headers = unique_headers(&row(&["Saldo", "", "Saldo"]));
        assert_eq!(headers, row(&["Saldo", "column_2", "Saldo_1"]));
    }

    #[test]
    fn test_four_account_columns() {
        let catalog = TrialBalanceCatalog::builtin();
        let frame = header_frame(&[
            "Cuenta N1",
            "Cuenta N2",
            "Cuenta",
            "Cuenta Reporte",
            "Descripción",
            "Saldo 31/12/2023",
            "Debe",
            "Haber",
            "Saldo Final",
        ]);
        let result = TrialBalanceMapper::new(&catalog).auto_map(&frame, Some(0));
        let m = result.canonical_to_source();

        assert_eq!(m.get(GL_ACCOUNT_NUMBER).map(String::as_str), Some("Cuenta"));
        assert_eq!(m.get(REPORTING_ACCOUNT).map(String::as_str), Some("Cuenta Reporte"));
        assert_eq!(m.get(BEGINNING_BALANCE).map(String::as_str), Some("Saldo 31/12/2023"));
        assert_eq!(m.get(ENDING_BALANCE).map(String::as_str), Some("Saldo Final"));
        assert_eq!(m.get(ACTIVITY_DEBIT).map(String::as_str), Some("Debe"));
        assert_eq!(m.get(ACTIVITY_CREDIT).map(String::as_str), Some("Haber"));
        assert_eq!(m.get(GL_ACCOUNT_NAME).map(String::as_str), Some("Descripción"));
        // 层级列不进入未映射列表
        assert!(result.unmapped_columns.is_empty());
        assert!(!result.requires_manual_mapping());
    }

    #[test]
    fn test_three_account_columns_without_reporting() {
        let catalog = TrialBalanceCatalog::builtin();
        let frame = header_frame(&["Cuenta", "Cta Mayor", "Cta Grupo", "Saldo Final"]);
        let result = TrialBalanceMapper::new(&catalog).auto_map(&frame, Some(0));
        assert_eq!(result.mapping.source_for(GL_ACCOUNT_NUMBER), Some("Cuenta"));
        assert_eq!(result.mapping.source_for(REPORTING_ACCOUNT), None);
    }

    #[test]
    fn test_too_few_account_columns_requires_mapping() {
        let catalog = TrialBalanceCatalog::builtin();
        let frame = header_frame(&["Cuenta", "Saldo Final"]);
        let result = TrialBalanceMapper::new(&catalog).auto_map(&frame, Some(0));
        assert_eq!(result.missing_required_fields, vec![GL_ACCOUNT_NUMBER.to_string()]);
        assert!(result.requires_manual_mapping());
    }

    #[test]
    fn test_dated_balances_without_final() {
        let catalog = TrialBalanceCatalog::builtin();
        let frame = header_frame(&[
            "Cuenta N1",
            "Cuenta N2",
            "Cuenta",
            "Saldo 31/12/2024",
            "Saldo 31/12/2023",
        ]);
        let result = TrialBalanceMapper::new(&catalog).auto_map(&frame, Some(0));
        assert_eq!(result.mapping.source_for(BEGINNING_BALANCE), Some("Saldo 31/12/2023"));
        assert_eq!(result.mapping.source_for(ENDING_BALANCE), Some("Saldo 31/12/2024"));
    }
}
