// ==========================================
// 会计数据导入管道 - 结果发布 (C10)
// ==========================================
// 职责: 按字段目录对齐输出，写入 results 容器
// 路径: {project}/{exec}/je/{exec}-je-cabecera.csv
//       {project}/{exec}/je/{exec}-je-detalle.csv
//       {project}/{exec}/sys/{exec}-sys.csv
// 红线: 未通过校验的执行一律拒绝发布（逐文件独立）
// ==========================================

use crate::domain::catalog::FieldCatalogs;
use crate::domain::execution::{Execution, PublishedPaths};
use crate::domain::frame::Frame;
use crate::domain::types::FileType;
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::retry::RetryPolicy;
use crate::importer::csv_writer::frame_to_csv;
use crate::importer::journal_transformer::JournalTransformer;
use crate::repository::storage::StorageBackend;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 发布文件统一使用逗号分隔
pub const RESULTS_DELIMITER: u8 = b',';

pub fn journal_header_path(project_id: &str, execution_id: &str) -> String {
    format!("{}/{}/je/{}-je-cabecera.csv", project_id, execution_id, execution_id)
}

pub fn journal_detail_path(project_id: &str, execution_id: &str) -> String {
    format!("{}/{}/je/{}-je-detalle.csv", project_id, execution_id, execution_id)
}

pub fn trial_balance_path(project_id: &str, execution_id: &str) -> String {
    format!("{}/{}/sys/{}-sys.csv", project_id, execution_id, execution_id)
}

pub struct ResultsPublisher {
    storage: Arc<dyn StorageBackend>,
    catalogs: Arc<FieldCatalogs>,
    results_container: String,
    retry: RetryPolicy,
}

impl ResultsPublisher {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        catalogs: Arc<FieldCatalogs>,
        results_container: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            catalogs,
            results_container: results_container.into(),
            retry,
        }
    }

    pub fn results_container(&self) -> &str {
        &self.results_container
    }

    /// 发布单个执行的规范化数据
    ///
    /// # 参数
    /// - execution: 必须已通过校验
    /// - frame: 映射阶段产出的规范化帧
    ///
    /// # 返回
    /// - 已写入的对象路径（不含容器名）
    #[instrument(skip(self, execution, frame), fields(execution_id = %execution.id, file_type = %execution.file_type))]
    pub async fn publish(
        &self,
        execution: &Execution,
        project_id: &str,
        frame: &Frame,
    ) -> PipelineResult<PublishedPaths> {
        if !execution.status.has_passed_validation() {
            warn!(status = %execution.status, "未通过校验，拒绝发布");
            return Err(PipelineError::ValidationFailed {
                execution_id: execution.id.clone(),
                failed_phases: failed_phase_names(execution),
            });
        }

        match execution.file_type {
            FileType::Je => self.publish_journal(&execution.id, project_id, frame).await,
            FileType::Sys => self.publish_trial_balance(&execution.id, project_id, frame).await,
        }
    }

    async fn publish_journal(
        &self,
        execution_id: &str,
        project_id: &str,
        frame: &Frame,
    ) -> PipelineResult<PublishedPaths> {
        let split = JournalTransformer::new(&self.catalogs.journal).split(frame);

        let header_path = journal_header_path(project_id, execution_id);
        let detail_path = journal_detail_path(project_id, execution_id);
        self.put_frame(&header_path, &split.header).await?;
        self.put_frame(&detail_path, &split.detail).await?;

        info!(
            header_rows = split.header.len(),
            detail_rows = split.detail.len(),
            "Libro Diario 已发布"
        );
        Ok(PublishedPaths {
            journal_header: Some(header_path),
            journal_detail: Some(detail_path),
            trial_balance: None,
        })
    }

    async fn publish_trial_balance(
        &self,
        execution_id: &str,
        project_id: &str,
        frame: &Frame,
    ) -> PipelineResult<PublishedPaths> {
        let aligned = frame.project(&self.catalogs.trial_balance.field_names());
        let path = trial_balance_path(project_id, execution_id);
        self.put_frame(&path, &aligned).await?;

        info!(rows = aligned.len(), "Sumas y Saldos 已发布");
        Ok(PublishedPaths {
            journal_header: None,
            journal_detail: None,
            trial_balance: Some(path),
        })
    }

    async fn put_frame(&self, path: &str, frame: &Frame) -> PipelineResult<()> {
        let bytes = frame_to_csv(frame, RESULTS_DELIMITER)?;
        self.retry
            .run("results.put", None, || {
                let bytes = bytes.clone();
                async move {
                    self.storage
                        .put(&self.results_container, path, bytes)
                        .await
                        .map_err(PipelineError::from)
                }
            })
            .await?;
        Ok(())
    }
}

fn failed_phase_names(execution: &Execution) -> Vec<String> {
    execution
        .validation_report()
        .map(|r| {
            r.phases
                .iter()
                .filter(|p| !p.is_phase_valid)
                .map(|p| p.phase_name.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::NewExecution;
    use crate::domain::types::ExecutionStatus;
    use crate::importer::csv_writer::frame_from_csv;
    use crate::repository::storage::InMemoryStorageBackend;
    use std::time::Duration;

    fn publisher(storage: Arc<InMemoryStorageBackend>) -> ResultsPublisher {
        ResultsPublisher::new(
            storage,
            Arc::new(FieldCatalogs::builtin()),
            "results",
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    fn execution(id: &str, file_type: FileType, status: ExecutionStatus) -> Execution {
        let mut exec = Execution::from_new(
            id.to_string(),
            NewExecution {
                file_type,
                test_type: "libro_diario_import".into(),
                project_id: "p1".into(),
                ..Default::default()
            },
        );
        exec.status = status;
        exec
    }

    fn journal_frame() -> Frame {
        let catalog = FieldCatalogs::builtin().journal;
        let names = catalog.all_field_names();
        let rows = vec![
            names
                .iter()
                .map(|n| match n.as_str() {
                    "journal_entry_id" => "JE-1".to_string(),
                    "line_number" => "1".to_string(),
                    _ => String::new(),
                })
                .collect(),
            names
                .iter()
                .map(|n| match n.as_str() {
                    "journal_entry_id" => "JE-1".to_string(),
                    "line_number" => "2".to_string(),
                    _ => String::new(),
                })
                .collect(),
        ];
        Frame::from_rows(names, rows)
    }

    #[tokio::test]
    async fn test_header_deduplicated_and_detail_keyed() {
        let storage = Arc::new(InMemoryStorageBackend::new());
        let publisher = publisher(storage.clone());
        let exec = execution("e1", FileType::Je, ExecutionStatus::PublishReady);

        let paths = publisher.publish(&exec, "p1", &journal_frame()).await.unwrap();
        assert_eq!(paths.journal_header.as_deref(), Some("p1/e1/je/e1-je-cabecera.csv"));

        let header = storage.get("results", "p1/e1/je/e1-je-cabecera.csv").await.unwrap();
        let header = frame_from_csv(&header, RESULTS_DELIMITER, "cabecera").unwrap();
        assert_eq!(header.len(), 1);

        let detail = storage.get("results", "p1/e1/je/e1-je-detalle.csv").await.unwrap();
        let detail = frame_from_csv(&detail, RESULTS_DELIMITER, "detalle").unwrap();
        assert_eq!(detail.column_names()[0], "journal_entry_id");
        assert_eq!(detail.len(), 2);
    }

    #[tokio::test]
    async fn test_trial_balance_aligned_to_catalog() {
        let storage = Arc::new(InMemoryStorageBackend::new());
        let publisher = publisher(storage.clone());
        let exec = execution("e1-ss", FileType::Sys, ExecutionStatus::Validated);
        let frame = Frame::from_rows(vec!["gl_account_number".into()], vec![vec!["100".into()]]);

        publisher.publish(&exec, "p1", &frame).await.unwrap();
        let bytes = storage.get("results", "p1/e1-ss/sys/e1-ss-sys.csv").await.unwrap();
        let published = frame_from_csv(&bytes, RESULTS_DELIMITER, "sys").unwrap();
        assert_eq!(
            published.column_names().to_vec(),
            FieldCatalogs::builtin().trial_balance.field_names()
        );
    }

    #[tokio::test]
    async fn test_failed_execution_is_refused() {
        let storage = Arc::new(InMemoryStorageBackend::new());
        let publisher = publisher(storage.clone());
        let exec = execution("e2", FileType::Je, ExecutionStatus::Failed);

        let err = publisher.publish(&exec, "p1", &journal_frame()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailed { .. }));
        assert_eq!(storage.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_transient_storage_failure_is_retried() {
        let storage = Arc::new(InMemoryStorageBackend::new());
        storage.fail_next_writes(1);
        let publisher = publisher(storage.clone());
        let exec = execution("e3-ss", FileType::Sys, ExecutionStatus::Validated);
        let frame = Frame::from_rows(vec!["gl_account_number".into()], vec![vec!["100".into()]]);

        assert!(publisher.publish(&exec, "p1", &frame).await.is_ok());
    }
}
