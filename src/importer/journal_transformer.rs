// ==========================================
// 会计数据导入管道 - Libro Diario 转换器 (C5)
// ==========================================
// 流程: 重命名 → 数值清洗 → 借贷派生 → 日期拆分 → 按分录号排序
//       → 目录类型转换 → 投影到目录列
// 红线: 输出列 = 目录列（目录顺序）；有 amount 必有 D/H 标志
// ==========================================

use crate::domain::catalog::JournalCatalog;
use crate::domain::frame::Frame;
use crate::domain::mapping::ColumnMapping;
use crate::domain::report::JournalStats;
use crate::importer::datetime::DateTimeNormalizer;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::numeric::{NumericNormalizer, AMOUNT, CREDIT_AMOUNT, DEBIT_AMOUNT};
use crate::importer::type_transformer::TypeTransformer;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

pub const JOURNAL_ENTRY_ID: &str = "journal_entry_id";
pub const GL_ACCOUNT_NUMBER: &str = "gl_account_number";

/// 需要整数清洗的列
const INTEGER_FIELDS: &[&str] = &["line_number", "fiscal_year", "period_number"];

/// 需要日期/时间规范化的列（顺序有意义: entry_date 可能生成 entry_time）
const DATE_FIELDS: &[&str] = &["entry_date", "entry_time", "posting_date"];

/// 转换结果
#[derive(Debug, Clone)]
pub struct JournalOutput {
    /// 扁平规范帧（全部目录列）
    pub frame: Frame,
    pub stats: JournalStats,
}

/// header / detail 拆分结果
#[derive(Debug, Clone)]
pub struct JournalSplit {
    pub header: Frame,
    pub detail: Frame,
}

// ==========================================
// JournalTransformer
// ==========================================
pub struct JournalTransformer<'a> {
    catalog: &'a JournalCatalog,
}

impl<'a> JournalTransformer<'a> {
    pub fn new(catalog: &'a JournalCatalog) -> Self {
        Self { catalog }
    }

    /// 应用映射并规范化
    ///
    /// # 参数
    /// - source: 原始帧（源列名）
    /// - mapping: 已确认的映射
    ///
    /// # 返回
    /// - Ok(JournalOutput): 目录列对齐的帧 + 统计
    /// - Err(MappingIncomplete): 映射为空或缺少 journal_entry_id
    #[instrument(skip(self, source, mapping), fields(rows = source.len()))]
    pub fn transform(&self, source: &Frame, mapping: &ColumnMapping) -> ImportResult<JournalOutput> {
        if mapping.source_for(JOURNAL_ENTRY_ID).is_none() {
            return Err(ImportError::MappingIncomplete {
                missing: vec![JOURNAL_ENTRY_ID.to_string()],
            });
        }

        let mut frame = source.rename_and_select(&mapping.pairs());
        let mut stats = JournalStats {
            total_rows: frame.len(),
            columns_mapped: frame.width(),
            ..Default::default()
        };

        // 1. 数值清洗（派生规则之前必须完成）
        for field in [AMOUNT, DEBIT_AMOUNT, CREDIT_AMOUNT] {
            NumericNormalizer::clean_amount_column(&mut frame, field);
        }
        for field in INTEGER_FIELDS {
            NumericNormalizer::clean_integer_column(&mut frame, field);
        }
        if let Some(column) = frame.column_mut(GL_ACCOUNT_NUMBER) {
            for value in column.iter_mut() {
                *value = NumericNormalizer::normalize_account(value);
            }
        }

        // 2. 借贷派生
        let derivation = NumericNormalizer::derive_debit_credit(&mut frame);
        stats.amount_derived = derivation.amount_derived;
        stats.indicator_derived = derivation.indicators_filled > 0;

        // 3. 日期/时间
        for field in DATE_FIELDS {
            if let Some(outcome) = DateTimeNormalizer::separate(&mut frame, field) {
                stats.date_parse_failures += outcome.parse_failures;
                if outcome.companion_column.is_some() {
                    stats.date_columns_split.push(outcome.field);
                }
            }
        }

        // 4. 排序
        sort_by_entry_id(&mut frame);

        // 5. 类型转换 + 投影
        let fields = self.catalog.all_fields();
        TypeTransformer::transform(&mut frame, &fields);
        let frame = frame.project(&self.catalog.all_field_names());

        stats.total_entries = frame
            .column(JOURNAL_ENTRY_ID)
            .map(|ids| {
                ids.iter()
                    .filter(|v| !v.is_empty())
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0);

        info!(
            rows = stats.total_rows,
            entries = stats.total_entries,
            mapped = stats.columns_mapped,
            amount_derived = stats.amount_derived,
            "Libro Diario 转换完成"
        );
        Ok(JournalOutput { frame, stats })
    }

    /// 拆分为 header（按 journal_entry_id 去重，保留首次出现）与 detail
    pub fn split(&self, flat: &Frame) -> JournalSplit {
        let mut header = flat.project(&self.catalog.header_names());
        header.dedup_by(JOURNAL_ENTRY_ID);
        let detail = flat.project(&self.catalog.detail_names_with_entry_id());
        debug!(
            header_rows = header.len(),
            detail_rows = detail.len(),
            "header/detail 拆分完成"
        );
        JournalSplit { header, detail }
    }
}

/// 按 journal_entry_id 稳定升序；全部为整数时按数值，否则按字符串
fn sort_by_entry_id(frame: &mut Frame) {
    let Some(ids) = frame.column(JOURNAL_ENTRY_ID) else {
        return;
    };
    let numeric: Option<Vec<i128>> = ids.iter().map(|v| v.trim().parse::<i128>().ok()).collect();

    let mut order: Vec<usize> = (0..ids.len()).collect();
    match numeric {
        Some(keys) => order.sort_by_key(|&i| keys[i]),
        None => order.sort_by(|&a, &b| ids[a].trim().cmp(ids[b].trim())),
    }
    frame.reorder(&order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::{MappingEntry, MappingOrigin};

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
        let mut mapping = ColumnMapping::default();
        for (source, target) in pairs {
            mapping.insert(MappingEntry {
                source_column: s(source),
                canonical_field: s(target),
                confidence: 1.0,
                rationale: s("test"),
                origin: MappingOrigin::Manual,
            });
        }
        mapping
    }

    #[test]
    fn test_debit_credit_derivation_end_to_end() {
        let catalog = JournalCatalog::builtin();
        let source = Frame::from_rows(
            vec![s("Asiento"), s("Cuenta"), s("Debe"), s("Haber")],
            vec![vec![s("1"), s("5720001"), s("100,00"), s("0")]],
        );
        let map = mapping(&[
            ("Asiento", "journal_entry_id"),
            ("Cuenta", "gl_account_number"),
            ("Debe", "debit_amount"),
            ("Haber", "credit_amount"),
        ]);

        let out = JournalTransformer::new(&catalog).transform(&source, &map).unwrap();
        assert_eq!(out.frame.cell(0, "amount"), Some("100.00"));
        assert_eq!(out.frame.cell(0, "debit_credit_indicator"), Some("D"));
        assert!(out.stats.amount_derived);
        assert_eq!(out.frame.column_names(), catalog.all_field_names().as_slice());
    }

    #[test]
    fn test_spreadsheet_amounts_keep_decimals() {
        let catalog = JournalCatalog::builtin();
        // 第一行来自 Excel 数值单元格，第二行为文本
        let source = Frame::from_typed_rows(
            vec![s("Asiento"), s("Importe")],
            vec![vec![s("1"), s("100.005")], vec![s("1"), s("100.005")]],
            vec![vec![true, true], vec![false, false]],
        );
        let map = mapping(&[("Asiento", "journal_entry_id"), ("Importe", "amount")]);

        let out = JournalTransformer::new(&catalog).transform(&source, &map).unwrap();
        assert_eq!(out.frame.cell(0, "amount"), Some("100.01"));
        assert_eq!(out.frame.cell(1, "amount"), Some("100005.00"));
        assert_eq!(out.frame.cell(0, "debit_credit_indicator"), Some("D"));
    }

    #[test]
    fn test_combined_datetime_is_split() {
        let catalog = JournalCatalog::builtin();
        let source = Frame::from_rows(
            vec![s("Asiento"), s("Fecha"), s("Importe")],
            vec![vec![s("JE-1"), s("31.12.2024 14:05:07"), s("10")]],
        );
        let map = mapping(&[
            ("Asiento", "journal_entry_id"),
            ("Fecha", "entry_date"),
            ("Importe", "amount"),
        ]);

        let out = JournalTransformer::new(&catalog).transform(&source, &map).unwrap();
        assert_eq!(out.frame.cell(0, "entry_date"), Some("2024-12-31"));
        assert_eq!(out.frame.cell(0, "entry_time"), Some("14:05:07"));
        assert_eq!(out.stats.date_columns_split, vec![s("entry_date")]);
    }

    #[test]
    fn test_numeric_ids_sort_numerically_and_stably() {
        let catalog = JournalCatalog::builtin();
        let source = Frame::from_rows(
            vec![s("Asiento"), s("Linea")],
            vec![
                vec![s("10"), s("1")],
                vec![s("9"), s("1")],
                vec![s("10"), s("2")],
            ],
        );
        let map = mapping(&[("Asiento", "journal_entry_id"), ("Linea", "line_number")]);

        let out = JournalTransformer::new(&catalog).transform(&source, &map).unwrap();
        let ids = out.frame.column("journal_entry_id").unwrap();
        let lines = out.frame.column("line_number").unwrap();
        assert_eq!(ids, &[s("9"), s("10"), s("10")]);
        assert_eq!(lines, &[s("1"), s("1"), s("2")]);
        assert_eq!(out.stats.total_entries, 2);
    }

    #[test]
    fn test_header_dedup_keeps_one_row_per_entry() {
        let catalog = JournalCatalog::builtin();
        let source = Frame::from_rows(
            vec![s("Asiento"), s("Linea"), s("Importe")],
            vec![
                vec![s("JE-1"), s("1"), s("50")],
                vec![s("JE-1"), s("2"), s("-50")],
            ],
        );
        let map = mapping(&[
            ("Asiento", "journal_entry_id"),
            ("Linea", "line_number"),
            ("Importe", "amount"),
        ]);
        let transformer = JournalTransformer::new(&catalog);
        let out = transformer.transform(&source, &map).unwrap();
        let split = transformer.split(&out.frame);

        assert_eq!(split.header.len(), 1);
        assert_eq!(split.header.column_names(), catalog.header_names().as_slice());
        assert_eq!(split.detail.len(), 2);
        assert_eq!(split.detail.column_names()[0], "journal_entry_id");
        assert_eq!(split.detail.cell(1, "debit_credit_indicator"), Some("H"));
    }

    #[test]
    fn test_missing_entry_id_is_incomplete() {
        let catalog = JournalCatalog::builtin();
        let source = Frame::from_rows(vec![s("Importe")], vec![vec![s("1")]]);
        let map = mapping(&[("Importe", "amount")]);
        let err = JournalTransformer::new(&catalog)
            .transform(&source, &map)
            .unwrap_err();
        assert!(matches!(err, ImportError::MappingIncomplete { .. }));
    }
}
