// ==========================================
// 会计数据导入管道 - 人工映射决策合并
// ==========================================
// 输入: 自动映射结果 + userDecisions {sourceColumn → {field_type, …}}
// 红线: 规范字段唯一；冲突时只有 forceOverride 才能抢占
// ==========================================

use crate::domain::mapping::{
    ColumnMapping, MappingEntry, MappingOrigin, MappingResult, UserDecisions,
};
use crate::importer::error::{ImportError, ImportResult};
use tracing::{debug, info};

/// 合并选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualMappingOptions {
    /// 目标字段已被其他源列占用时，允许抢占
    pub force_override: bool,
}

/// 将用户决策合并进自动映射
///
/// # 参数
/// - auto: 自动映射结果（提供源列清单）
/// - decisions: 用户决策
/// - catalog_fields: 允许的规范字段
/// - required: 决策完成后必须已映射的字段组（任一即可）
/// - options: 合并选项
///
/// # 返回
/// - Ok(MappingResult): 合并后的映射（剩余未决策的列视为忽略）
/// - Err(UnknownColumn / UnknownField / DuplicateTarget / MappingIncomplete)
pub fn apply_user_decisions(
    auto: &MappingResult,
    decisions: &UserDecisions,
    catalog_fields: &[String],
    required: &dyn Fn(&ColumnMapping) -> Vec<String>,
    options: ManualMappingOptions,
) -> ImportResult<MappingResult> {
    let mut mapping: ColumnMapping = auto.mapping.clone();

    for (source, decision) in decisions {
        if !auto.source_columns.iter().any(|c| c == source) {
            return Err(ImportError::UnknownColumn(source.clone()));
        }

        if decision.is_ignore() {
            mapping.remove_source(source);
            debug!(source = %source, "用户忽略该列");
            continue;
        }

        let field = decision.field_type.trim();
        if !catalog_fields.iter().any(|f| f == field) {
            return Err(ImportError::UnknownField {
                column: source.clone(),
                field: field.to_string(),
            });
        }

        if let Some(existing) = mapping.source_for(field) {
            if existing != source && !options.force_override {
                return Err(ImportError::DuplicateTarget {
                    field: field.to_string(),
                    existing: existing.to_string(),
                });
            }
        }

        mapping.replace(MappingEntry {
            source_column: source.clone(),
            canonical_field: field.to_string(),
            confidence: decision.confidence.unwrap_or(1.0),
            rationale: decision
                .note
                .clone()
                .unwrap_or_else(|| "用户人工映射".to_string()),
            origin: MappingOrigin::Manual,
        });
    }

    let missing = required(&mapping);
    if !missing.is_empty() {
        return Err(ImportError::MappingIncomplete { missing });
    }

    info!(
        decisions = decisions.len(),
        mapped = mapping.len(),
        "人工映射已合并"
    );

    Ok(MappingResult {
        mapping,
        unmapped_columns: Vec::new(),
        missing_required_fields: Vec::new(),
        header_row: auto.header_row,
        source_columns: auto.source_columns.clone(),
    })
}
