// ==========================================
// 会计数据导入管道 - 命令行入口
// ==========================================
// 用法:
//   contabilidad-ingesta <libro_diario> [sumas_saldos]
//       [--project ID] [--period YYYY-MM] [--config-db PATH]
// 流程: 上传 → 自动映射 → 校验 → 发布 → 加载器，结果以 JSON 打印
// ==========================================

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use contabilidad_ingesta::app::{get_default_config_db_path, AppState};
use contabilidad_ingesta::domain::execution::Execution;
use contabilidad_ingesta::domain::types::ExecutionStatus;
use contabilidad_ingesta::logging;
use serde_json::json;

const DEFAULT_PROJECT: &str = "local";
const DEFAULT_TEST_TYPE: &str = "libro_diario_import";

#[derive(Debug, Default)]
struct CliArgs {
    journal: PathBuf,
    trial_balance: Option<PathBuf>,
    project_id: Option<String>,
    period: Option<String>,
    config_db: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--project" => cli.project_id = Some(args.next().context("--project 缺少取值")?),
            "--period" => cli.period = Some(args.next().context("--period 缺少取值")?),
            "--config-db" => cli.config_db = Some(args.next().context("--config-db 缺少取值")?),
            flag if flag.starts_with("--") => bail!("未知参数: {}", flag),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let mut positional = positional.into_iter();
    cli.journal = positional
        .next()
        .ok_or_else(|| anyhow!("用法: contabilidad-ingesta <libro_diario> [sumas_saldos] [--project ID] [--period P] [--config-db PATH]"))?;
    cli.trial_balance = positional.next();
    if let Some(extra) = positional.next() {
        bail!("多余的参数: {}", extra.display());
    }
    Ok(cli)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("无效文件路径: {}", path.display()))
}

/// 上传单个文件并等待自动映射结束
async fn ingest(
    state: &AppState,
    path: &Path,
    project_id: &str,
    period: Option<&str>,
    parent_execution_id: Option<&str>,
) -> Result<Execution> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("无法读取文件 {}", path.display()))?;
    let receipt = state
        .import_api
        .upload(
            bytes,
            &file_name(path)?,
            DEFAULT_TEST_TYPE,
            project_id,
            period,
            parent_execution_id,
            None,
        )
        .await
        .map_err(|e| anyhow!("上传失败: {}", e))?;

    let exec = state
        .import_api
        .wait_for_upload(&receipt.execution_id)
        .await
        .map_err(|e| anyhow!("上传处理失败: {}", e))?;
    tracing::info!(execution_id = %exec.id, status = %exec.status, "文件已接收");
    Ok(exec)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = parse_args(std::env::args().skip(1))?;
    let config_db = cli.config_db.clone().unwrap_or_else(get_default_config_db_path);

    tracing::info!("==================================================");
    tracing::info!("{} v{}", contabilidad_ingesta::APP_NAME, contabilidad_ingesta::VERSION);
    tracing::info!("使用配置库: {}", config_db);
    tracing::info!("==================================================");

    let state = AppState::new(&config_db).await.map_err(|e| anyhow!(e))?;
    let project_id = cli.project_id.as_deref().unwrap_or(DEFAULT_PROJECT);

    let journal = ingest(&state, &cli.journal, project_id, cli.period.as_deref(), None).await?;
    let mut executions = vec![journal.id.clone()];
    if let Some(tb_path) = &cli.trial_balance {
        let tb = ingest(&state, tb_path, project_id, None, Some(&journal.id)).await?;
        executions.push(tb.id);
    }

    let mut reports = Vec::new();
    for id in &executions {
        let exec = state.import_api.execution_info(id).await.map_err(|e| anyhow!("{}", e))?;
        if exec.status != ExecutionStatus::Mapped {
            tracing::warn!(execution_id = %id, status = %exec.status, "未完成映射，跳过校验");
            continue;
        }
        let report = match exec.file_type {
            contabilidad_ingesta::FileType::Je => {
                state
                    .validation_api
                    .run_journal_validations(id, cli.period.as_deref())
                    .await
            }
            contabilidad_ingesta::FileType::Sys => {
                state.validation_api.run_trial_balance_validations(id).await
            }
        }
        .map_err(|e| anyhow!("校验失败: {}", e))?;
        reports.push(json!({ "executionId": id, "report": report }));
    }

    let mut final_state = Vec::new();
    for id in &executions {
        let exec = state.import_api.execution_info(id).await.map_err(|e| anyhow!("{}", e))?;
        final_state.push(exec);
    }

    let output = json!({
        "executions": final_state,
        "validations": reports,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(args(&["diario.csv", "sumas.xlsx", "--period", "2024-12"])).unwrap();
        assert_eq!(cli.journal, PathBuf::from("diario.csv"));
        assert_eq!(cli.trial_balance, Some(PathBuf::from("sumas.xlsx")));
        assert_eq!(cli.period.as_deref(), Some("2024-12"));

        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["a.csv", "--verbose"])).is_err());
        assert!(parse_args(args(&["a.csv", "--project"])).is_err());
    }
}
