// ==========================================
// 会计数据导入管道 - 执行记录领域模型
// ==========================================
// 职责: Execution（一次上传 = 一次执行）及其更新/过滤/配对视图
// 红线: 子执行 ID 一律由父 ID 推导（{parentId}-ss），不存反向指针
// ==========================================

use crate::domain::mapping::MappingResult;
use crate::domain::report::{JournalStats, TrialBalanceStats, ValidationReport};
use crate::domain::types::{ErrorKind, ExecutionStatus, FileType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sumas y Saldos 子执行 ID 后缀
pub const TRIAL_BALANCE_SUFFIX: &str = "-ss";

/// 由父执行 ID 推导子执行 ID
pub fn child_execution_id(parent_id: &str) -> String {
    format!("{}{}", parent_id, TRIAL_BALANCE_SUFFIX)
}

// ==========================================
// Execution - 执行记录
// ==========================================
// 持久化: 内存 / 每执行一个 JSON 文件（camelCase，ISO 时间戳）
// 兼容: 旧记录缺失字段时按默认值补齐（id 由文件名补）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Execution {
    // ===== 标识 =====
    pub id: String,
    pub file_type: FileType,
    pub test_type: String,
    pub project_id: String,
    pub period: Option<String>,
    pub parent_execution_id: Option<String>,

    // ===== 状态 =====
    pub status: ExecutionStatus,
    pub step: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // ===== 调用方上下文（透传给加载器）=====
    pub auth_user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub workspace_id: Option<String>,

    // ===== 文件指针 =====
    pub file_name: Option<String>,
    pub original_file_name: Option<String>,
    pub file_path: Option<String>,
    pub output_file: Option<String>,
    pub auto_mapeo_output_file: Option<String>,
    pub manual_mapeo_output_file: Option<String>,
    pub sumas_saldos_raw_path: Option<String>,
    pub sumas_saldos_csv_path: Option<String>,
    pub sumas_saldos_auto_csv_path: Option<String>,
    pub sumas_saldos_manual_csv_path: Option<String>,

    // ===== 阶段结果 =====
    pub mapeo_results: Option<MappingResult>,
    pub mapeo_stats: Option<JournalStats>,
    pub validation_rules_results: Option<ValidationReport>,
    pub sumas_saldos_stats: Option<TrialBalanceStats>,
    pub sumas_saldos_mapping: Option<MappingResult>,
    pub sumas_saldos_validation_results: Option<ValidationReport>,

    // ===== 人工映射标志 =====
    pub manual_mapping_required: bool,
    pub unmapped_fields_count: usize,
    pub sumas_saldos_manual_mapping_required: bool,
    pub sumas_saldos_unmapped_count: usize,

    // ===== 发布 / 加载 =====
    pub published_paths: Option<PublishedPaths>,
    pub loader_result: Option<LoadResult>,
    pub error: Option<ExecutionError>,
}

impl Default for Execution {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            file_type: FileType::Je,
            test_type: String::new(),
            project_id: String::new(),
            period: None,
            parent_execution_id: None,
            status: ExecutionStatus::Pending,
            step: String::new(),
            created_at: now,
            updated_at: now,
            auth_user_id: None,
            tenant_id: None,
            workspace_id: None,
            file_name: None,
            original_file_name: None,
            file_path: None,
            output_file: None,
            auto_mapeo_output_file: None,
            manual_mapeo_output_file: None,
            sumas_saldos_raw_path: None,
            sumas_saldos_csv_path: None,
            sumas_saldos_auto_csv_path: None,
            sumas_saldos_manual_csv_path: None,
            mapeo_results: None,
            mapeo_stats: None,
            validation_rules_results: None,
            sumas_saldos_stats: None,
            sumas_saldos_mapping: None,
            sumas_saldos_validation_results: None,
            manual_mapping_required: false,
            unmapped_fields_count: 0,
            sumas_saldos_manual_mapping_required: false,
            sumas_saldos_unmapped_count: 0,
            published_paths: None,
            loader_result: None,
            error: None,
        }
    }
}

impl Execution {
    /// 根据创建请求构造执行记录（ID 由调用方决定）
    pub fn from_new(id: String, new: NewExecution) -> Self {
        Self {
            id,
            file_type: new.file_type,
            test_type: new.test_type,
            project_id: new.project_id,
            period: new.period,
            parent_execution_id: new.parent_execution_id.filter(|p| !p.trim().is_empty()),
            auth_user_id: new.auth_user_id,
            tenant_id: new.tenant_id,
            workspace_id: new.workspace_id,
            original_file_name: new.original_file_name,
            step: "created".to_string(),
            ..Default::default()
        }
    }

    pub fn is_trial_balance(&self) -> bool {
        self.file_type == FileType::Sys
    }

    /// 所属配对的父执行 ID
    pub fn pair_parent_id(&self) -> String {
        match (&self.file_type, &self.parent_execution_id) {
            (FileType::Sys, Some(parent)) => parent.clone(),
            _ => self.id.clone(),
        }
    }

    /// 当前规范化 CSV（人工映射优先于自动映射）
    pub fn mapped_csv_path(&self) -> Option<&str> {
        match self.file_type {
            FileType::Je => self
                .manual_mapeo_output_file
                .as_deref()
                .or(self.auto_mapeo_output_file.as_deref())
                .or(self.output_file.as_deref()),
            FileType::Sys => self
                .sumas_saldos_manual_csv_path
                .as_deref()
                .or(self.sumas_saldos_auto_csv_path.as_deref())
                .or(self.sumas_saldos_csv_path.as_deref()),
        }
    }

    /// 本执行对应的校验报告
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        match self.file_type {
            FileType::Je => self.validation_rules_results.as_ref(),
            FileType::Sys => self.sumas_saldos_validation_results.as_ref(),
        }
    }

    /// 更新时间戳（保证严格递增）
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

// ==========================================
// NewExecution - 创建请求
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewExecution {
    pub file_type: FileType,
    pub test_type: String,
    pub project_id: String,
    pub period: Option<String>,
    pub parent_execution_id: Option<String>,
    pub original_file_name: Option<String>,
    pub auth_user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub workspace_id: Option<String>,
}

impl NewExecution {
    /// 新执行 ID：Sys 子执行为 {parentId}-ss，其余为 UUID
    pub fn coordinated_id(&self) -> String {
        match (&self.file_type, self.parent_execution_id.as_deref()) {
            (FileType::Sys, Some(parent)) if !parent.trim().is_empty() => {
                child_execution_id(parent.trim())
            }
            _ => Uuid::new_v4().to_string(),
        }
    }
}

// ==========================================
// ExecutionUpdate - 可更新字段白名单
// ==========================================
// 红线: 结构体之外的字段一律不可更新（deny_unknown_fields）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub step: Option<String>,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub output_file: Option<String>,
    pub auto_mapeo_output_file: Option<String>,
    pub manual_mapeo_output_file: Option<String>,
    pub sumas_saldos_raw_path: Option<String>,
    pub sumas_saldos_csv_path: Option<String>,
    pub sumas_saldos_auto_csv_path: Option<String>,
    pub sumas_saldos_manual_csv_path: Option<String>,
    pub mapeo_results: Option<MappingResult>,
    pub mapeo_stats: Option<JournalStats>,
    pub validation_rules_results: Option<ValidationReport>,
    pub sumas_saldos_stats: Option<TrialBalanceStats>,
    pub sumas_saldos_mapping: Option<MappingResult>,
    pub sumas_saldos_validation_results: Option<ValidationReport>,
    pub manual_mapping_required: Option<bool>,
    pub unmapped_fields_count: Option<usize>,
    pub sumas_saldos_manual_mapping_required: Option<bool>,
    pub sumas_saldos_unmapped_count: Option<usize>,
    pub published_paths: Option<PublishedPaths>,
    pub loader_result: Option<LoadResult>,
    pub error: Option<ExecutionError>,
    pub clear_error: Option<bool>,
}

impl ExecutionUpdate {
    pub fn status(status: ExecutionStatus, step: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            step: Some(step.into()),
            ..Default::default()
        }
    }

    /// 从任意 JSON 构造，拒绝白名单以外的字段
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// 合并到执行记录并推进 updatedAt
    pub fn apply_to(self, exec: &mut Execution) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(v) = self.$field {
                        exec.$field = v;
                    }
                )*
            };
        }
        macro_rules! merge_opt {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(v) = self.$field {
                        exec.$field = Some(v);
                    }
                )*
            };
        }

        merge!(
            status,
            step,
            manual_mapping_required,
            unmapped_fields_count,
            sumas_saldos_manual_mapping_required,
            sumas_saldos_unmapped_count,
        );
        merge_opt!(
            file_name,
            file_path,
            output_file,
            auto_mapeo_output_file,
            manual_mapeo_output_file,
            sumas_saldos_raw_path,
            sumas_saldos_csv_path,
            sumas_saldos_auto_csv_path,
            sumas_saldos_manual_csv_path,
            mapeo_results,
            mapeo_stats,
            validation_rules_results,
            sumas_saldos_stats,
            sumas_saldos_mapping,
            sumas_saldos_validation_results,
            published_paths,
            loader_result,
        );

        if self.clear_error == Some(true) {
            exec.error = None;
        }
        if let Some(err) = self.error {
            exec.error = Some(err);
        }

        exec.touch();
    }
}

// ==========================================
// ExecutionFilter - 列表过滤
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub file_type: Option<FileType>,
    pub parent_execution_id: Option<String>,
}

impl ExecutionFilter {
    pub fn matches(&self, exec: &Execution) -> bool {
        if let Some(ft) = self.file_type {
            if exec.file_type != ft {
                return false;
            }
        }
        if let Some(parent) = &self.parent_execution_id {
            if exec.parent_execution_id.as_deref() != Some(parent.as_str()) {
                return false;
            }
        }
        true
    }
}

// ==========================================
// ExecutionPair - 父（Libro Diario）+ 子（Sumas y Saldos）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPair {
    pub parent: Option<Execution>,
    pub child: Option<Execution>,
}

impl ExecutionPair {
    /// 加载器前置条件：父子均已通过校验（无子执行时仅看父）
    pub fn both_validated(&self) -> bool {
        let parent_ok = self
            .parent
            .as_ref()
            .map(|p| p.status.has_passed_validation())
            .unwrap_or(false);
        let child_ok = self
            .child
            .as_ref()
            .map(|c| c.status.has_passed_validation())
            .unwrap_or(true);
        parent_ok && child_ok
    }

    pub fn members(&self) -> impl Iterator<Item = &Execution> {
        self.parent.iter().chain(self.child.iter())
    }
}

// ==========================================
// ExecutionError - 挂在执行记录上的错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

// ==========================================
// PublishedPaths - 发布结果路径
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PublishedPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_balance: Option<String>,
}

impl PublishedPaths {
    pub fn merge(&mut self, other: PublishedPaths) {
        if other.journal_header.is_some() {
            self.journal_header = other.journal_header;
        }
        if other.journal_detail.is_some() {
            self.journal_detail = other.journal_detail;
        }
        if other.trial_balance.is_some() {
            self.trial_balance = other.trial_balance;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.journal_header.is_none() && self.journal_detail.is_none() && self.trial_balance.is_none()
    }
}

// ==========================================
// 加载器结果信封
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderErrorEnvelope {
    pub error_code: String,
    pub error_message: String,
    pub error_title: Option<String>,
    pub error_severity: Option<i32>,
    pub error_category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub generated_id: Option<String>,
    pub error: Option<LoaderErrorEnvelope>,
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ==========================================
// 调用方上下文
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalContext {
    pub auth_user_id: String,
    pub tenant_id: Option<String>,
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    pub project_id: String,
    pub tenant_id: Option<String>,
    pub workspace_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_journal() -> NewExecution {
        NewExecution {
            file_type: FileType::Je,
            test_type: "libro_diario_import".to_string(),
            project_id: "P-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_coordinated_id_for_child() {
        let mut new = new_journal();
        new.file_type = FileType::Sys;
        new.parent_execution_id = Some("abc".to_string());
        assert_eq!(new.coordinated_id(), "abc-ss");
    }

    #[test]
    fn test_coordinated_id_for_journal_is_uuid() {
        let id = new_journal().coordinated_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_update_merges_and_advances_timestamp() {
        let mut exec = Execution::from_new("e1".to_string(), new_journal());
        let before = exec.clone();

        let update = ExecutionUpdate {
            step: Some("auto_mapping".to_string()),
            unmapped_fields_count: Some(3),
            ..Default::default()
        };
        update.apply_to(&mut exec);

        assert_eq!(exec.step, "auto_mapping");
        assert_eq!(exec.unmapped_fields_count, 3);
        assert!(exec.updated_at > before.updated_at);
        assert_eq!(exec.created_at, before.created_at);
        assert_eq!(exec.status, before.status);
    }

    #[test]
    fn test_update_rejects_fields_outside_whitelist() {
        let result = ExecutionUpdate::from_json(json!({ "status": "mapped", "project_id": "X" }));
        assert!(result.is_err());

        let ok = ExecutionUpdate::from_json(json!({ "status": "mapped", "output_file": "a.csv" }))
            .unwrap();
        assert_eq!(ok.status, Some(ExecutionStatus::Mapped));
    }

    #[test]
    fn test_legacy_record_gets_defaults() {
        let exec: Execution = serde_json::from_value(json!({ "fileType": "Sys" })).unwrap();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.id.is_empty());
        assert_eq!(exec.file_type, FileType::Sys);
    }

    #[test]
    fn test_pair_requires_both_validated() {
        let mut parent = Execution::from_new("p".to_string(), new_journal());
        parent.status = ExecutionStatus::Validated;
        let mut child = Execution::from_new("p-ss".to_string(), new_journal());
        child.status = ExecutionStatus::Mapped;

        let pair = ExecutionPair {
            parent: Some(parent.clone()),
            child: Some(child),
        };
        assert!(!pair.both_validated());

        let single = ExecutionPair {
            parent: Some(parent),
            child: None,
        };
        assert!(single.both_validated());
    }
}
