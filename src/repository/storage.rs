// ==========================================
// 会计数据导入管道 - 对象存储接口
// ==========================================
// 容器: uploads（原始上传）/ mapeos（映射产物）/ results（发布结果）
// 实现: LocalStorageBackend（本地目录）/ InMemoryStorageBackend（测试与单机）
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 写入对象（覆盖），返回 "{container}/{path}"
    async fn put(&self, container: &str, path: &str, bytes: Vec<u8>) -> RepositoryResult<String>;

    async fn get(&self, container: &str, path: &str) -> RepositoryResult<Vec<u8>>;

    async fn exists(&self, container: &str, path: &str) -> RepositoryResult<bool>;

    /// 删除对象，返回是否存在
    async fn delete(&self, container: &str, path: &str) -> RepositoryResult<bool>;

    /// 按前缀列出对象路径（不含容器名）
    async fn list(&self, container: &str, prefix: &str) -> RepositoryResult<Vec<String>>;
}

/// 对象路径校验: 相对路径，不允许 ".."
fn checked_relative(path: &str) -> RepositoryResult<PathBuf> {
    let p = Path::new(path.trim_start_matches('/'));
    if path.is_empty() || p.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(RepositoryError::InternalError(format!("非法对象路径: {}", path)));
    }
    Ok(p.to_path_buf())
}

// ==========================================
// LocalStorageBackend - 本地目录
// ==========================================
// 布局: {root}/{container}/{path}
pub struct LocalStorageBackend {
    root: PathBuf,
}

impl LocalStorageBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 对象在本地的绝对路径
    pub fn resolve(&self, container: &str, path: &str) -> RepositoryResult<PathBuf> {
        Ok(self.root.join(checked_relative(container)?).join(checked_relative(path)?))
    }
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn put(&self, container: &str, path: &str, bytes: Vec<u8>) -> RepositoryResult<String> {
        let target = self.resolve(container, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let size = bytes.len();
        fs::write(&target, bytes).await?;
        debug!(container, path, size, "对象已写入本地存储");
        Ok(format!("{}/{}", container, path))
    }

    async fn get(&self, container: &str, path: &str) -> RepositoryResult<Vec<u8>> {
        let target = self.resolve(container, path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RepositoryError::ObjectNotFound {
                container: container.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, container: &str, path: &str) -> RepositoryResult<bool> {
        Ok(fs::try_exists(self.resolve(container, path)?).await?)
    }

    async fn delete(&self, container: &str, path: &str) -> RepositoryResult<bool> {
        match fs::remove_file(self.resolve(container, path)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, container: &str, prefix: &str) -> RepositoryResult<Vec<String>> {
        let base = self.root.join(checked_relative(container)?);
        let mut out = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&base) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        out.push(key);
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

// ==========================================
// InMemoryStorageBackend - 内存存储
// ==========================================
#[derive(Default)]
pub struct InMemoryStorageBackend {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
    // 接下来 N 次写入返回 StorageUnavailable（模拟存储抖动）
    failing_writes: AtomicUsize,
}

impl InMemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来 `count` 次 put 失败
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorageBackend {
    async fn put(&self, container: &str, path: &str, bytes: Vec<u8>) -> RepositoryResult<String> {
        checked_relative(path)?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RepositoryError::StorageUnavailable(format!(
                "写入 {}/{} 暂时失败",
                container, path
            )));
        }
        self.objects
            .write()
            .await
            .insert((container.to_string(), path.to_string()), bytes);
        Ok(format!("{}/{}", container, path))
    }

    async fn get(&self, container: &str, path: &str) -> RepositoryResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(container.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| RepositoryError::ObjectNotFound {
                container: container.to_string(),
                path: path.to_string(),
            })
    }

    async fn exists(&self, container: &str, path: &str) -> RepositoryResult<bool> {
        Ok(self
            .objects
            .read()
            .await
            .contains_key(&(container.to_string(), path.to_string())))
    }

    async fn delete(&self, container: &str, path: &str) -> RepositoryResult<bool> {
        Ok(self
            .objects
            .write()
            .await
            .remove(&(container.to_string(), path.to_string()))
            .is_some())
    }

    async fn list(&self, container: &str, prefix: &str) -> RepositoryResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(c, p)| c == container && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorageBackend::new(dir.path());

        let key = storage
            .put("results", "P1/e1/je/e1-je-cabecera.csv", b"a,b\n".to_vec())
            .await
            .unwrap();
        assert_eq!(key, "results/P1/e1/je/e1-je-cabecera.csv");
        assert_eq!(storage.get("results", "P1/e1/je/e1-je-cabecera.csv").await.unwrap(), b"a,b\n");
        assert_eq!(
            storage.list("results", "P1/e1").await.unwrap(),
            vec!["P1/e1/je/e1-je-cabecera.csv".to_string()]
        );
        assert!(storage.delete("results", "P1/e1/je/e1-je-cabecera.csv").await.unwrap());
        assert!(!storage.exists("results", "P1/e1/je/e1-je-cabecera.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorageBackend::new(dir.path());
        assert!(storage.put("uploads", "../escape.csv", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_injected_failures() {
        let storage = InMemoryStorageBackend::new();
        storage.fail_next_writes(1);
        let err = storage.put("uploads", "a.csv", vec![1]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::StorageUnavailable(_)));
        storage.put("uploads", "a.csv", vec![1]).await.unwrap();
        assert_eq!(storage.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = InMemoryStorageBackend::new();
        let err = storage.get("uploads", "nope.csv").await.unwrap_err();
        assert!(matches!(err, RepositoryError::ObjectNotFound { .. }));
    }
}
