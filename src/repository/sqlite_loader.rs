// ==========================================
// 会计数据导入管道 - SQLite 加载器
// ==========================================
// 角色: 扮演下游存储过程，把已发布的 CSV 落入分析库
// 表: load_log（每执行一行，execution_id 唯一）/ load_staging（逐行 JSON）
// 红线: 同一执行重复调用返回同一 load_id；业务失败返回错误信封
// ==========================================

use crate::domain::execution::{LoadResult, LoaderErrorEnvelope};
use crate::domain::frame::Frame;
use crate::importer::file_parser::UniversalFileParser;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::loader_backend::{LoaderBackend, LoaderRequest};
use crate::repository::storage::StorageBackend;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS load_log (
    load_id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL UNIQUE,
    auth_user_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    tenant_id TEXT,
    workspace_id TEXT,
    header_rows INTEGER NOT NULL DEFAULT 0,
    detail_rows INTEGER NOT NULL DEFAULT 0,
    trial_balance_rows INTEGER NOT NULL DEFAULT 0,
    loaded_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS load_staging (
    load_id TEXT NOT NULL,
    execution_id TEXT NOT NULL,
    file_kind TEXT NOT NULL,
    row_no INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (load_id, file_kind, row_no)
);
"#;

/// 错误信封严重级别（与 SQL Server RAISERROR 16 对齐）
const BUSINESS_SEVERITY: i32 = 16;

pub struct SqliteLoaderBackend {
    conn: Arc<Mutex<Connection>>,
    storage: Arc<dyn StorageBackend>,
    results_container: String,
}

impl SqliteLoaderBackend {
    /// 打开（或创建）加载库
    pub fn open(
        db_path: &str,
        storage: Arc<dyn StorageBackend>,
        results_container: &str,
    ) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)), storage, results_container)
    }

    /// 内存库（测试 / 单机演示）
    pub fn in_memory(storage: Arc<dyn StorageBackend>, results_container: &str) -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(Arc::new(Mutex::new(conn)), storage, results_container)
    }

    pub fn from_connection(
        conn: Arc<Mutex<Connection>>,
        storage: Arc<dyn StorageBackend>,
        results_container: &str,
    ) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            guard.execute_batch(SCHEMA)?;
        }
        Ok(Self {
            conn,
            storage,
            results_container: results_container.to_string(),
        })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 某执行已落库的暂存行数
    pub fn staged_rows(&self, execution_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM load_staging WHERE execution_id = ?1",
            params![execution_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn existing_load(&self, execution_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT load_id FROM load_log WHERE execution_id = ?1",
                params![execution_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }

    /// 读取一个已发布文件；不存在时返回 None
    async fn read_published(&self, path: &str) -> RepositoryResult<Option<Frame>> {
        match self.storage.get(&self.results_container, path).await {
            Ok(bytes) => UniversalFileParser
                .parse_frame(&bytes, path)
                .map(Some)
                .map_err(|e| RepositoryError::InternalError(e.to_string())),
            Err(RepositoryError::ObjectNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn stage(
        &self,
        request: &LoaderRequest,
        files: &[(&'static str, Frame)],
    ) -> RepositoryResult<String> {
        let load_id = Uuid::new_v4().to_string();
        let count_of = |kind: &str| {
            files
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, f)| f.len() as i64)
                .unwrap_or(0)
        };

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        tx.execute(
            r#"
            INSERT INTO load_log (
                load_id, execution_id, auth_user_id, project_id, tenant_id, workspace_id,
                header_rows, detail_rows, trial_balance_rows, loaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                load_id,
                request.execution_id,
                request.auth_user_id,
                request.project_id,
                request.tenant_id,
                request.workspace_id,
                count_of("journal_header"),
                count_of("journal_detail"),
                count_of("trial_balance"),
                Utc::now().to_rfc3339(),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO load_staging (load_id, execution_id, file_kind, row_no, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (kind, frame) in files {
                for idx in 0..frame.len() {
                    let row: BTreeMap<&str, &str> = frame.row_map(idx).into_iter().collect();
                    let payload = serde_json::to_string(&row)?;
                    stmt.execute(params![load_id, request.execution_id, kind, idx as i64, payload])?;
                }
            }
        }
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(load_id)
    }
}

fn envelope(code: &str, title: &str, message: String) -> LoadResult {
    LoadResult {
        generated_id: None,
        error: Some(LoaderErrorEnvelope {
            error_code: code.to_string(),
            error_message: message,
            error_title: Some(title.to_string()),
            error_severity: Some(BUSINESS_SEVERITY),
            error_category: Some("Validation".to_string()),
        }),
    }
}

/// 明细中引用了 header 不存在的分录号
fn orphan_details(header: &Frame, detail: &Frame) -> Vec<String> {
    let ids: HashSet<&str> = header
        .column("journal_entry_id")
        .map(|c| c.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let mut orphans: Vec<String> = detail
        .column("journal_entry_id")
        .map(|c| {
            c.iter()
                .filter(|id| !ids.contains(id.as_str()))
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default();
    orphans.sort();
    orphans
}

#[async_trait]
impl LoaderBackend for SqliteLoaderBackend {
    async fn run_load(&self, request: &LoaderRequest) -> RepositoryResult<LoadResult> {
        if let Some(load_id) = self.existing_load(&request.execution_id)? {
            info!(execution_id = %request.execution_id, load_id = %load_id, "重复加载请求，返回既有结果");
            return Ok(LoadResult {
                generated_id: Some(load_id),
                error: None,
            });
        }

        if request.published.is_empty() {
            return Ok(envelope(
                "LOAD_NO_FILES",
                "Sin archivos publicados",
                format!("执行 {} 没有已发布的结果文件", request.execution_id),
            ));
        }

        let targets = [
            ("journal_header", request.published.journal_header.as_deref()),
            ("journal_detail", request.published.journal_detail.as_deref()),
            ("trial_balance", request.published.trial_balance.as_deref()),
        ];
        let mut files: Vec<(&'static str, Frame)> = Vec::new();
        for (kind, path) in targets {
            let Some(path) = path else { continue };
            match self.read_published(path).await? {
                Some(frame) => files.push((kind, frame)),
                None => {
                    warn!(execution_id = %request.execution_id, path, "已发布文件缺失");
                    return Ok(envelope(
                        "LOAD_FILE_MISSING",
                        "Archivo publicado no encontrado",
                        format!("结果文件不存在: {}/{}", self.results_container, path),
                    ));
                }
            }
        }

        let header = files.iter().find(|(k, _)| *k == "journal_header").map(|(_, f)| f);
        let detail = files.iter().find(|(k, _)| *k == "journal_detail").map(|(_, f)| f);
        if let (Some(header), Some(detail)) = (header, detail) {
            let orphans = orphan_details(header, detail);
            if !orphans.is_empty() {
                return Ok(envelope(
                    "LOAD_ORPHAN_DETAIL",
                    "Detalle sin cabecera",
                    format!("明细引用了不存在的分录: {}", orphans.join(", ")),
                ));
            }
        }

        let load_id = self.stage(request, &files)?;
        info!(
            execution_id = %request.execution_id,
            load_id = %load_id,
            files = files.len(),
            "加载完成"
        );
        Ok(LoadResult {
            generated_id: Some(load_id),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::PublishedPaths;
    use crate::repository::storage::InMemoryStorageBackend;

    async fn seeded_storage() -> Arc<InMemoryStorageBackend> {
        let storage = Arc::new(InMemoryStorageBackend::new());
        storage
            .put("results", "P/e1/je/e1-je-cabecera.csv", b"journal_entry_id,entry_date\nJE-1,2024-12-01\n".to_vec())
            .await
            .unwrap();
        storage
            .put(
                "results",
                "P/e1/je/e1-je-detalle.csv",
                b"journal_entry_id,amount\nJE-1,10.00\nJE-1,-10.00\n".to_vec(),
            )
            .await
            .unwrap();
        storage
    }

    fn request(published: PublishedPaths) -> LoaderRequest {
        LoaderRequest {
            auth_user_id: "u-1".into(),
            execution_id: "e1".into(),
            project_id: "P".into(),
            published,
            ..Default::default()
        }
    }

    fn journal_paths() -> PublishedPaths {
        PublishedPaths {
            journal_header: Some("P/e1/je/e1-je-cabecera.csv".into()),
            journal_detail: Some("P/e1/je/e1-je-detalle.csv".into()),
            trial_balance: None,
        }
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let storage = seeded_storage().await;
        let loader = SqliteLoaderBackend::in_memory(storage, "results").unwrap();

        let first = loader.run_load(&request(journal_paths())).await.unwrap();
        assert!(first.is_success());
        assert_eq!(loader.staged_rows("e1").unwrap(), 3);

        let second = loader.run_load(&request(journal_paths())).await.unwrap();
        assert_eq!(first.generated_id, second.generated_id);
        assert_eq!(loader.staged_rows("e1").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_business_error() {
        let storage = Arc::new(InMemoryStorageBackend::new());
        let loader = SqliteLoaderBackend::in_memory(storage, "results").unwrap();
        let result = loader.run_load(&request(journal_paths())).await.unwrap();
        let err = result.error.unwrap();
        assert_eq!(err.error_code, "LOAD_FILE_MISSING");
        assert_eq!(err.error_severity, Some(16));
    }

    #[tokio::test]
    async fn test_no_files_envelope() {
        let storage = Arc::new(InMemoryStorageBackend::new());
        let loader = SqliteLoaderBackend::in_memory(storage, "results").unwrap();
        let result = loader.run_load(&request(PublishedPaths::default())).await.unwrap();
        assert_eq!(result.error.unwrap().error_code, "LOAD_NO_FILES");
    }
}
