// ==========================================
// 会计数据导入管道 - 文件执行记录存储
// ==========================================
// 适用: 容器运行（多副本共享卷）
// 布局: {execStoreDir}/{executionId}.json（camelCase，ISO 时间戳）
// 写入: 整对象写临时文件后 rename，不做局部更新
// ==========================================

use crate::domain::execution::{Execution, ExecutionFilter, ExecutionUpdate};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::execution_store::ExecutionStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct FileExecutionStore {
    dir: PathBuf,
    // 读-改-写串行化
    write_guard: Mutex<()>,
}

impl FileExecutionStore {
    /// 创建存储（目录不存在时创建）
    pub async fn open(dir: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "文件执行存储已就绪");
        Ok(Self {
            dir,
            write_guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> RepositoryResult<PathBuf> {
        // ID 会成为文件名，拒绝路径分隔符
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(RepositoryError::InternalError(format!("非法执行 ID: {}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn read_record(&self, path: &Path) -> RepositoryResult<Option<Execution>> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut exec: Execution = serde_json::from_slice(&raw)?;
        // 旧记录缺 id 时以文件名补齐
        if exec.id.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                exec.id = stem.to_string();
            }
        }
        Ok(Some(exec))
    }

    async fn write_record(&self, exec: &Execution) -> RepositoryResult<()> {
        let path = self.record_path(&exec.id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", exec.id));
        let body = serde_json::to_vec_pretty(exec)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn insert(&self, execution: Execution) -> RepositoryResult<Execution> {
        let _guard = self.write_guard.lock().await;
        let path = self.record_path(&execution.id)?;
        if fs::try_exists(&path).await? {
            return Err(RepositoryError::AlreadyExists {
                entity: "Execution".to_string(),
                id: execution.id,
            });
        }
        self.write_record(&execution).await?;
        Ok(execution)
    }

    async fn get(&self, id: &str) -> RepositoryResult<Option<Execution>> {
        let path = self.record_path(id)?;
        self.read_record(&path).await
    }

    async fn update(&self, id: &str, update: ExecutionUpdate) -> RepositoryResult<Execution> {
        let _guard = self.write_guard.lock().await;
        let path = self.record_path(id)?;
        let mut exec = self
            .read_record(&path)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Execution", id))?;
        update.apply_to(&mut exec);
        self.write_record(&exec).await?;
        Ok(exec)
    }

    async fn list(&self, filter: &ExecutionFilter) -> RepositoryResult<Vec<Execution>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if !is_record {
                continue;
            }
            match self.read_record(&path).await {
                Ok(Some(exec)) if filter.matches(&exec) => out.push(exec),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "跳过无法解析的执行记录"),
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        let _guard = self.write_guard.lock().await;
        let path = self.record_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
