// ==========================================
// 会计数据导入管道 - 校验报告与统计
// ==========================================
// 职责: ValidationReport（分阶段）+ 转换统计
// 约束: 每项检查最多保留 10 条违规样本
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单项检查保留的违规样本上限
pub const MAX_VIOLATION_SAMPLES: usize = 10;

// ==========================================
// Violation - 违规样本
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub row: usize,
    pub value: String,
    pub issue: String,
}

// ==========================================
// CheckResult - 单项检查
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub check_name: String,
    pub field: Option<String>,
    pub is_valid: bool,
    /// 可选检查（列缺失时跳过并视为通过）
    pub optional: bool,
    pub skipped: bool,
    pub total_checked: usize,
    pub invalid_count: usize,
    pub samples: Vec<Violation>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    pub fn new(check_name: &str, field: Option<&str>) -> Self {
        Self {
            check_name: check_name.to_string(),
            field: field.map(|f| f.to_string()),
            is_valid: true,
            optional: false,
            skipped: false,
            total_checked: 0,
            invalid_count: 0,
            samples: Vec::new(),
            message: String::new(),
            details: None,
        }
    }

    /// 跳过的检查视为通过
    pub fn skipped(check_name: &str, field: Option<&str>, message: impl Into<String>) -> Self {
        let mut result = Self::new(check_name, field);
        result.optional = true;
        result.skipped = true;
        result.message = message.into();
        result
    }

    /// 记录一条违规（样本截断到上限，计数不截断）
    pub fn record(&mut self, row: usize, value: &str, issue: impl Into<String>) {
        self.invalid_count += 1;
        self.is_valid = false;
        if self.samples.len() < MAX_VIOLATION_SAMPLES {
            self.samples.push(Violation {
                row,
                value: value.to_string(),
                issue: issue.into(),
            });
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ==========================================
// PhaseReport - 阶段报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase_number: u8,
    pub phase_name: String,
    pub completed: bool,
    pub is_phase_valid: bool,
    pub validations: Vec<CheckResult>,
    pub summary: PhaseSummary,
}

impl PhaseReport {
    pub fn from_checks(phase_number: u8, phase_name: &str, validations: Vec<CheckResult>) -> Self {
        let passed = validations.iter().filter(|c| c.is_valid).count();
        let failed = validations.len() - passed;
        Self {
            phase_number,
            phase_name: phase_name.to_string(),
            completed: true,
            is_phase_valid: failed == 0,
            summary: PhaseSummary {
                total_checks: validations.len(),
                passed,
                failed,
            },
            validations,
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.validations.iter().find(|c| c.check_name == name)
    }
}

// ==========================================
// ValidationReport - 完整报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_phases: usize,
    pub completed_phases: usize,
    pub passed_phases: usize,
    pub failed_phases: usize,
    pub all_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub report_type: String,
    pub execution_id: String,
    pub period: Option<String>,
    pub total_rows: usize,
    pub phases: Vec<PhaseReport>,
    pub summary: ReportSummary,
    pub generated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// allPassed ≡ 每个已完成阶段均有效
    pub fn build(
        report_type: &str,
        execution_id: &str,
        period: Option<&str>,
        total_rows: usize,
        phases: Vec<PhaseReport>,
    ) -> Self {
        let completed: Vec<&PhaseReport> = phases.iter().filter(|p| p.completed).collect();
        let passed = completed.iter().filter(|p| p.is_phase_valid).count();
        let summary = ReportSummary {
            total_phases: phases.len(),
            completed_phases: completed.len(),
            passed_phases: passed,
            failed_phases: completed.len() - passed,
            all_passed: completed.iter().all(|p| p.is_phase_valid),
        };
        Self {
            report_type: report_type.to_string(),
            execution_id: execution_id.to_string(),
            period: period.map(|p| p.to_string()),
            total_rows,
            phases,
            summary,
            generated_at: Utc::now(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.all_passed
    }

    pub fn phase(&self, number: u8) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase_number == number)
    }
}

// ==========================================
// 转换统计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalStats {
    pub total_rows: usize,
    pub total_entries: usize,
    pub columns_mapped: usize,
    pub amount_derived: bool,
    pub indicator_derived: bool,
    pub date_columns_split: Vec<String>,
    pub date_parse_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialBalanceStats {
    pub total_rows: usize,
    pub total_accounts: usize,
    pub has_reporting_account: bool,
    pub has_beginning_balance: bool,
    pub has_debit_credit: bool,
    pub columns_mapped: usize,
}
