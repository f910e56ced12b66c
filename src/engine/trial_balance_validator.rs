// ==========================================
// 会计数据导入管道 - Sumas y Saldos 格式校验 (C7)
// ==========================================
// 单阶段: 科目号非空 + 余额列为数值
// 科目重复只作提示，不判失败
// ==========================================

use crate::domain::frame::Frame;
use crate::domain::report::{CheckResult, PhaseReport, ValidationReport, MAX_VIOLATION_SAMPLES};
use crate::engine::journal_validator::number_re;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, instrument};

pub const REPORT_TYPE: &str = "sumas_saldos";

const GL_ACCOUNT_NUMBER: &str = "gl_account_number";

/// 出现即需为数值的余额列
pub const BALANCE_FIELDS: &[&str] = &[
    "period_beginning_balance",
    "period_ending_balance",
    "period_activity_debit",
    "period_activity_credit",
];

pub struct TrialBalanceValidator;

impl TrialBalanceValidator {
    #[instrument(skip(frame), fields(rows = frame.len()))]
    pub fn validate(frame: &Frame, execution_id: &str) -> ValidationReport {
        let phase = Self::phase_format(frame);
        let report = ValidationReport::build(REPORT_TYPE, execution_id, None, frame.len(), vec![phase]);
        info!(
            execution_id,
            all_passed = report.summary.all_passed,
            "Sumas y Saldos 校验完成"
        );
        report
    }

    pub fn phase_format(frame: &Frame) -> PhaseReport {
        let mut checks = vec![account_present(frame)];

        for &field in BALANCE_FIELDS {
            let name = format!("numerico_{}", field);
            if !frame.has_values(field) {
                checks.push(CheckResult::skipped(&name, Some(field), "列不存在或全为空，跳过"));
                continue;
            }
            let mut check = CheckResult::new(&name, Some(field));
            for (idx, value) in frame.column(field).unwrap_or_default().iter().enumerate() {
                let v = value.trim();
                if v.is_empty() {
                    continue;
                }
                check.total_checked += 1;
                if !number_re().is_match(v) {
                    check.record(idx + 1, value, "余额不是数值");
                }
            }
            let message = format!("{} 个值中 {} 个不是数值", check.total_checked, check.invalid_count);
            checks.push(check.with_message(message));
        }

        checks.push(account_uniqueness(frame));
        PhaseReport::from_checks(1, "Validaciones de Formato", checks)
    }
}

fn account_present(frame: &Frame) -> CheckResult {
    let mut check = CheckResult::new("gl_account_number_presente", Some(GL_ACCOUNT_NUMBER));
    let Some(accounts) = frame.column(GL_ACCOUNT_NUMBER) else {
        check.is_valid = false;
        return check.with_message("缺少 gl_account_number 列");
    };
    for (idx, account) in accounts.iter().enumerate() {
        check.total_checked += 1;
        if account.trim().is_empty() {
            check.record(idx + 1, account, "科目号为空");
        }
    }
    let message = format!("{} 行缺少科目号", check.invalid_count);
    check.with_message(message)
}

/// 仅提示: 重复科目不影响阶段结果
fn account_uniqueness(frame: &Frame) -> CheckResult {
    let check = CheckResult::new("gl_account_number_unico", Some(GL_ACCOUNT_NUMBER));
    let Some(accounts) = frame.column(GL_ACCOUNT_NUMBER) else {
        return check.with_message("缺少 gl_account_number 列，跳过");
    };

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for account in accounts.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        *counts.entry(account).or_default() += 1;
    }
    let mut duplicated: Vec<&str> = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(a, _)| *a)
        .collect();
    duplicated.sort_unstable();

    check
        .with_message(format!("{} 个科目重复出现（仅提示）", duplicated.len()))
        .with_details(json!({
            "duplicatedAccounts": duplicated.len(),
            "sampleAccounts": duplicated.iter().take(MAX_VIOLATION_SAMPLES).collect::<Vec<_>>(),
        }))
}
