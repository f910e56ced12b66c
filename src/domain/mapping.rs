// ==========================================
// 会计数据导入管道 - 映射领域模型
// ==========================================
// 职责: 源列 → 规范字段的映射、未映射列分析、人工映射决策
// 红线: 同一映射内规范字段唯一
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// 映射决策来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingOrigin {
    Auto,
    Manual,
}

// ==========================================
// MappingEntry - 单条映射决策
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub source_column: String,
    pub canonical_field: String,
    pub confidence: f64,
    pub rationale: String,
    pub origin: MappingOrigin,
}

// ==========================================
// ColumnMapping - 映射表
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub entries: Vec<MappingEntry>,
}

impl ColumnMapping {
    /// 追加映射；规范字段或源列已占用时返回 false
    pub fn insert(&mut self, entry: MappingEntry) -> bool {
        if self.target_for(&entry.source_column).is_some()
            || self.source_for(&entry.canonical_field).is_some()
        {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// 强制写入：移除冲突的旧决策后追加
    pub fn replace(&mut self, entry: MappingEntry) {
        self.entries.retain(|e| {
            e.source_column != entry.source_column && e.canonical_field != entry.canonical_field
        });
        self.entries.push(entry);
    }

    pub fn remove_source(&mut self, source: &str) {
        self.entries.retain(|e| e.source_column != source);
    }

    pub fn source_for(&self, canonical: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.canonical_field == canonical)
            .map(|e| e.source_column.as_str())
    }

    pub fn target_for(&self, source: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.source_column == source)
            .map(|e| e.canonical_field.as_str())
    }

    pub fn is_mapped_source(&self, source: &str) -> bool {
        self.target_for(source).is_some()
    }

    /// {canonicalField: sourceColumn}
    pub fn canonical_to_source(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.canonical_field.clone(), e.source_column.clone()))
            .collect()
    }

    /// (source, target) 对，供 Frame::rename_and_select 使用
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.source_column.clone(), e.canonical_field.clone()))
            .collect()
    }

    /// 规范字段唯一性
    pub fn has_unique_targets(&self) -> bool {
        let mut seen = HashSet::new();
        self.entries.iter().all(|e| seen.insert(e.canonical_field.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==========================================
// 未映射列分析
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSuggestion {
    pub field: String,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStatistics {
    pub count: usize,
    pub unique: usize,
    pub non_null: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedColumn {
    pub column_name: String,
    pub sample_data: Vec<String>,
    pub dtype: String,
    pub statistics: ColumnStatistics,
    pub suggestions: Vec<FieldSuggestion>,
}

// ==========================================
// MappingResult - 自动映射结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingResult {
    pub mapping: ColumnMapping,
    pub unmapped_columns: Vec<UnmappedColumn>,
    /// 必填但尚未映射的规范字段
    pub missing_required_fields: Vec<String>,
    /// 检测到的表头行（仅 Sumas y Saldos）
    pub header_row: Option<usize>,
    pub source_columns: Vec<String>,
}

impl MappingResult {
    /// {canonicalField: sourceColumn}
    pub fn canonical_to_source(&self) -> BTreeMap<String, String> {
        self.mapping.canonical_to_source()
    }

    pub fn unmapped_count(&self) -> usize {
        self.unmapped_columns.len()
    }

    pub fn requires_manual_mapping(&self) -> bool {
        !self.unmapped_columns.is_empty() || !self.missing_required_fields.is_empty()
    }
}

// ==========================================
// 人工映射决策
// ==========================================
// userDecisions: {sourceColumn → {field_type: canonicalField, …}}
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualDecision {
    pub field_type: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ManualDecision {
    pub fn to(field: &str) -> Self {
        Self {
            field_type: field.to_string(),
            ..Default::default()
        }
    }

    /// 空字段或 "ignore"/"ignorar" 表示用户确认忽略该列
    pub fn is_ignore(&self) -> bool {
        let v = self.field_type.trim().to_ascii_lowercase();
        v.is_empty() || v == "ignore" || v == "ignorar" || v == "none"
    }
}

pub type UserDecisions = BTreeMap<String, ManualDecision>;
