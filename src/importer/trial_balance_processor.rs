// ==========================================
// 会计数据导入管道 - Sumas y Saldos 处理器 (C6)
// ==========================================
// 流程: 定位表头 → 构造帧 → 应用映射 → 科目号规范化 → 余额清洗
//       → 剔除合计行 → 目录类型转换 → 投影到目录列
// ==========================================

use crate::domain::catalog::TrialBalanceCatalog;
use crate::domain::frame::Frame;
use crate::domain::mapping::ColumnMapping;
use crate::domain::report::TrialBalanceStats;
use crate::importer::csv_writer::frame_to_csv;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::Grid;
use crate::importer::numeric::NumericNormalizer;
use crate::importer::text::normalize_text;
use crate::importer::trial_balance_mapper::{
    detect_header_row, frame_from_grid, ACTIVITY_CREDIT, ACTIVITY_DEBIT, BEGINNING_BALANCE,
    ENDING_BALANCE, GL_ACCOUNT_NUMBER, REPORTING_ACCOUNT,
};
use crate::importer::type_transformer::TypeTransformer;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

const BALANCE_FIELDS: &[&str] = &[
    BEGINNING_BALANCE,
    ACTIVITY_DEBIT,
    ACTIVITY_CREDIT,
    ENDING_BALANCE,
];

/// 已定位表头的原始帧
#[derive(Debug, Clone)]
pub struct PreparedTrialBalance {
    pub frame: Frame,
    pub header_row: usize,
    /// false 表示未找到 CUENTA + SALDO 行，退回首行
    pub header_detected: bool,
}

#[derive(Debug, Clone)]
pub struct TrialBalanceOutput {
    pub frame: Frame,
    pub stats: TrialBalanceStats,
}

pub struct TrialBalanceProcessor<'a> {
    catalog: &'a TrialBalanceCatalog,
}

impl<'a> TrialBalanceProcessor<'a> {
    pub fn new(catalog: &'a TrialBalanceCatalog) -> Self {
        Self { catalog }
    }

    /// 在原始网格中定位表头并构造帧
    pub fn prepare(&self, grid: &Grid) -> ImportResult<PreparedTrialBalance> {
        if grid.rows.iter().all(|row| row.iter().all(|c| c.trim().is_empty())) {
            return Err(ImportError::EmptyFile("Sumas y Saldos".to_string()));
        }

        let (header_row, header_detected) = match detect_header_row(&grid.rows) {
            Some(idx) => (idx, true),
            None => {
                let first = grid
                    .rows
                    .iter()
                    .position(|row| row.iter().any(|c| !c.trim().is_empty()))
                    .unwrap_or(0);
                warn!(fallback = first, "未找到 CUENTA + SALDO 表头行，使用首个非空行");
                (first, false)
            }
        };

        let frame = frame_from_grid(grid, header_row);
        Ok(PreparedTrialBalance {
            frame,
            header_row,
            header_detected,
        })
    }

    /// 应用映射并规范化
    #[instrument(skip(self, source, mapping), fields(rows = source.len()))]
    pub fn process(&self, source: &Frame, mapping: &ColumnMapping) -> ImportResult<TrialBalanceOutput> {
        if mapping.source_for(GL_ACCOUNT_NUMBER).is_none() {
            return Err(ImportError::MappingIncomplete {
                missing: vec![GL_ACCOUNT_NUMBER.to_string()],
            });
        }

        let mut frame = source.rename_and_select(&mapping.pairs());
        let columns_mapped = frame.width();

        for field in [GL_ACCOUNT_NUMBER, REPORTING_ACCOUNT] {
            if let Some(column) = frame.column_mut(field) {
                for value in column.iter_mut() {
                    *value = NumericNormalizer::normalize_account(value);
                }
            }
        }

        for field in BALANCE_FIELDS {
            let Some(values) = frame.column(field) else {
                continue;
            };
            let cleaned: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(row, v)| match NumericNormalizer::clean_optional_cell(v, frame.is_numeric(row, field)) {
                    Some(d) => NumericNormalizer::format(d, 2),
                    None => v.clone(),
                })
                .collect();
            frame.set_column(field, cleaned);
            frame.mark_numeric(field);
        }

        let before = frame.len();
        let keep: Vec<bool> = (0..frame.len()).map(|i| !is_noise_row(&frame, i)).collect();
        frame.retain_rows(&keep);
        if frame.len() < before {
            info!(dropped = before - frame.len(), "剔除空行与合计行");
        }

        let fields: Vec<_> = self.catalog.fields.iter().collect();
        TypeTransformer::transform(&mut frame, &fields);
        let frame = frame.project(&self.catalog.field_names());

        let stats = TrialBalanceStats {
            total_rows: frame.len(),
            total_accounts: frame
                .column(GL_ACCOUNT_NUMBER)
                .map(|c| c.iter().filter(|v| !v.is_empty()).collect::<HashSet<_>>().len())
                .unwrap_or(0),
            has_reporting_account: frame.has_values(REPORTING_ACCOUNT),
            has_beginning_balance: frame.has_values(BEGINNING_BALANCE),
            has_debit_credit: frame.has_values(ACTIVITY_DEBIT) && frame.has_values(ACTIVITY_CREDIT),
            columns_mapped,
        };

        info!(
            rows = stats.total_rows,
            accounts = stats.total_accounts,
            mapped = stats.columns_mapped,
            "Sumas y Saldos 处理完成"
        );
        Ok(TrialBalanceOutput { frame, stats })
    }

    /// 输出 CSV（分隔符可配置，余额两位小数）
    pub fn to_csv(&self, output: &TrialBalanceOutput, delimiter: u8) -> ImportResult<Vec<u8>> {
        frame_to_csv(&output.frame, delimiter)
    }
}

/// 全空行，或科目号为空且含 TOTAL 字样的合计行
fn is_noise_row(frame: &Frame, row: usize) -> bool {
    let cells = frame.row(row);
    if cells.iter().all(|c| c.trim().is_empty()) {
        return true;
    }
    let account_empty = frame
        .cell(row, GL_ACCOUNT_NUMBER)
        .map(|v| v.trim().is_empty())
        .unwrap_or(true);
    account_empty && cells.iter().any(|c| normalize_text(c).contains("TOTAL"))
}
