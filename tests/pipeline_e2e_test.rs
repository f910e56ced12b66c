// ==========================================
// 会计数据导入管道 - 端到端测试
// ==========================================
// 覆盖: 上传 → 自动映射 → 人工映射 → 校验 → 发布 → 加载器
// ==========================================


use contabilidad_ingesta::api::{parse_user_decisions, ApiError};
use contabilidad_ingesta::domain::types::{ErrorKind, ExecutionStatus, FileType};
use serde_json::json;
use test_helpers::*;

// ==========================================
// 测试1: 配对上传，两个文件均通过后自动发布并加载
// ==========================================
#[tokio::test]
async fn test_pair_publishes_after_both_validated() {
    let env = create_test_env(|_| {});

    let journal = upload_and_wait(&env, "diario.csv", JOURNAL_CSV, Some("2024-12"), None).await;
    assert_eq!(journal.status, ExecutionStatus::Mapped);
    assert_eq!(journal.file_type, FileType::Je);
    assert!(!journal.manual_mapping_required);

    let tb = upload_and_wait(&env, "sumas.csv", TRIAL_BALANCE_CSV, None, Some(&journal.id)).await;
    assert_eq!(tb.id, format!("{}-ss", journal.id));
    assert_eq!(tb.file_type, FileType::Sys);
    assert_eq!(tb.period.as_deref(), Some("2024-12"));
    assert_eq!(tb.status, ExecutionStatus::Mapped);
    assert_eq!(tb.sumas_saldos_mapping.as_ref().unwrap().header_row, Some(4));

    let report = env
        .state
        .validation_api
        .run_journal_validations(&journal.id, None)
        .await
        .unwrap();
    assert!(report.all_passed(), "{:#?}", report);

    // 子执行尚未校验，父执行停在 validated
    let parent = env.state.import_api.execution_info(&journal.id).await.unwrap();
    assert_eq!(parent.status, ExecutionStatus::Validated);
    assert!(parent.published_paths.is_none());

    // 配对未就绪时手动发布被拒绝，状态不变
    let err = env
        .state
        .publish_api
        .publish_results(&journal.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{:?}", err);
    let parent = env.state.import_api.execution_info(&journal.id).await.unwrap();
    assert_eq!(parent.status, ExecutionStatus::Validated);

    let report = env
        .state
        .validation_api
        .run_trial_balance_validations(&tb.id)
        .await
        .unwrap();
    assert!(report.all_passed(), "{:#?}", report);

    let parent = env.state.import_api.execution_info(&journal.id).await.unwrap();
    let child = env.state.import_api.execution_info(&tb.id).await.unwrap();
    assert_eq!(parent.status, ExecutionStatus::Completed);
    assert_eq!(child.status, ExecutionStatus::Completed);

    let paths = parent.published_paths.clone().unwrap();
    assert!(paths.journal_header.is_some());
    assert!(paths.journal_detail.is_some());
    assert!(child.published_paths.as_ref().unwrap().trial_balance.is_some());

    let load = parent.loader_result.clone().unwrap();
    assert!(load.is_success());
    assert!(load.generated_id.is_some());
    assert!(env.loader.staged_rows(&journal.id).unwrap() > 0);
}

// ==========================================
// 测试2: 分录头按 journal_entry_id 去重
// ==========================================
#[tokio::test]
async fn test_published_header_has_one_row_per_entry() {
    let env = create_test_env(|s| s.require_trial_balance = false);
    let journal = upload_and_wait(&env, "diario.csv", JOURNAL_CSV, Some("2024-12"), None).await;

    env.state
        .validation_api
        .run_journal_validations(&journal.id, None)
        .await
        .unwrap();
    let exec = env.state.import_api.execution_info(&journal.id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    let paths = exec.published_paths.unwrap();

    let header = read_published(&env, paths.journal_header.as_deref().unwrap()).await;
    let ids = csv_column(&header, "journal_entry_id");
    assert_eq!(ids, vec!["JE-1".to_string(), "JE-2".to_string()]);

    let detail = read_published(&env, paths.journal_detail.as_deref().unwrap()).await;
    let lines = csv_column(&detail, "journal_entry_id");
    assert_eq!(lines.len(), 4);
    assert_eq!(lines.iter().filter(|id| *id == "JE-1").count(), 2);

    // 借贷派生: 金额 = 借 − 贷，方向 D/H
    let amounts = csv_column(&detail, "amount");
    let indicators = csv_column(&detail, "debit_credit_indicator");
    assert_eq!(amounts[0], "100.00");
    assert_eq!(indicators[0], "D");
    assert_eq!(amounts[1], "-100.00");
    assert_eq!(indicators[1], "H");
}

// ==========================================
// 测试3: 组合日期时间拆分为 entry_date + entry_time
// ==========================================
#[tokio::test]
async fn test_combined_datetime_is_split() {
    let env = create_test_env(|s| s.require_trial_balance = false);
    let body = "Asiento;Fecha;Cuenta;Importe\n\
        1;31.12.2024 14:05:07;4300001;50,00\n\
        1;31.12.2024 14:05:07;7000001;-50,00\n";
    let journal = upload_and_wait(&env, "diario.csv", body, Some("2024-12"), None).await;
    assert_eq!(journal.status, ExecutionStatus::Mapped);
    assert_eq!(
        journal.mapeo_stats.as_ref().unwrap().date_columns_split,
        vec!["entry_date".to_string()]
    );

    let report = env
        .state
        .validation_api
        .run_journal_validations(&journal.id, None)
        .await
        .unwrap();
    assert!(report.all_passed(), "{:#?}", report);

    let exec = env.state.import_api.execution_info(&journal.id).await.unwrap();
    let paths = exec.published_paths.unwrap();
    let header = read_published(&env, paths.journal_header.as_deref().unwrap()).await;
    assert_eq!(csv_column(&header, "entry_date"), vec!["2024-12-31".to_string()]);
    assert_eq!(csv_column(&header, "entry_time"), vec!["14:05:07".to_string()]);
}

// ==========================================
// 测试4: 过账日期超出期间 → 阶段 3 失败，不发布
// ==========================================
#[tokio::test]
async fn test_posting_date_outside_period_fails_phase_three() {
    let env = create_test_env(|s| s.require_trial_balance = false);
    let body = "Asiento;Fecha Contable;Cuenta;Debe;Haber\n\
        1;2024-12-30;4300001;10,00;0\n\
        1;2025-01-02;7000001;0;10,00\n";
    let journal = upload_and_wait(&env, "diario.csv", body, Some("2024-12"), None).await;

    let report = env
        .state
        .validation_api
        .run_journal_validations(&journal.id, Some("2024-12"))
        .await
        .unwrap();
    assert!(!report.all_passed());
    let phase = report.phase(3).unwrap();
    assert!(!phase.is_phase_valid);
    let check = phase.check("posting_date_en_periodo").unwrap();
    assert_eq!(check.invalid_count, 1);
    assert_eq!(check.samples[0].row, 2);
    assert_eq!(check.details.as_ref().unwrap()["periodStart"], "2024-12-01");
    assert_eq!(check.details.as_ref().unwrap()["periodEnd"], "2024-12-31");

    let exec = env.state.import_api.execution_info(&journal.id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.as_ref().unwrap().kind, ErrorKind::ValidationFailed);
    assert!(exec.validation_rules_results.is_some());

    let err = env
        .state
        .publish_api
        .publish_results(&journal.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationFailed { .. }));
}

// ==========================================
// 测试5: 自动映射缺字段 → 人工映射补齐
// ==========================================
#[tokio::test]
async fn test_manual_mapping_flow() {
    let env = create_test_env(|s| s.require_trial_balance = false);
    let body = "Asiento;Fecha;Cta Mayor;Valor Apunte;Referencia Interna\n\
        1;15/12/2024;4300001;10,00;A\n\
        1;15/12/2024;7000001;-10,00;B\n";
    let journal = upload_and_wait(&env, "diario.csv", body, None, None).await;
    assert_eq!(journal.status, ExecutionStatus::MappingRequired);
    assert!(journal.manual_mapping_required);

    let auto = env.state.mapping_api.get_auto_mapping(&journal.id).await.unwrap();
    assert!(auto.requires_manual_mapping());

    // 引用不存在的列 → InvalidInput，状态不变
    let bad = parse_user_decisions(json!({"Inexistente": {"field_type": "amount"}})).unwrap();
    let err = env
        .state
        .mapping_api
        .apply_manual_mapping(&journal.id, &bad, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let exec = env.state.import_api.execution_info(&journal.id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::MappingRequired);

    let decisions = parse_user_decisions(json!({
        "Cta Mayor": {"field_type": "gl_account_number"},
        "Valor Apunte": {"field_type": "amount", "confidence": 0.9},
        "Referencia Interna": {"field_type": "ignore"},
    }))
    .unwrap();
    let response = env
        .state
        .mapping_api
        .apply_manual_mapping(&journal.id, &decisions, true)
        .await
        .unwrap();
    assert!(response.csv_path.ends_with("_manual.csv"));

    let exec = env.state.import_api.execution_info(&journal.id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Mapped);
    assert!(!exec.manual_mapping_required);
    assert_eq!(exec.manual_mapeo_output_file.as_deref(), Some(response.csv_path.as_str()));

    let report = env
        .state
        .validation_api
        .run_journal_validations(&journal.id, Some("2024-12"))
        .await
        .unwrap();
    assert!(report.all_passed(), "{:#?}", report);
}

// ==========================================
// 测试6: Sumas y Saldos 接口拒绝 Libro Diario 执行
// ==========================================
#[tokio::test]
async fn test_trial_balance_endpoint_rejects_journal() {
    let env = create_test_env(|_| {});
    let journal = upload_and_wait(&env, "diario.csv", JOURNAL_CSV, None, None).await;

    let err = env
        .state
        .mapping_api
        .get_trial_balance_auto_mapping(&journal.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = env
        .state
        .import_api
        .execution_info("no-existe")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ==========================================
// 测试7: 取消与删除
// ==========================================
#[tokio::test]
async fn test_cancel_then_delete() {
    let env = create_test_env(|_| {});
    let journal = upload_and_wait(&env, "diario.csv", JOURNAL_CSV, None, None).await;

    let cancelled = env
        .state
        .import_api
        .cancel_execution(&journal.id, Some("usuario"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Failed);
    assert_eq!(cancelled.error.as_ref().unwrap().kind, ErrorKind::Cancelled);

    let listed = env.state.import_api.list_executions(Some("je"), None).await.unwrap();
    assert_eq!(listed.len(), 1);

    assert!(env.state.import_api.delete_execution(&journal.id).await.unwrap());
    let err = env.state.import_api.execution_info(&journal.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(env.state.import_api.list_executions(None, None).await.unwrap().is_empty());
}
