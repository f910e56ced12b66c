// ==========================================
// 会计数据导入管道 - 后台上传 worker
// ==========================================
// 职责: 分块接收字节流 → 临时文件，按执行记录上传进度
// 通道: 有界 mpsc（背压），进度用 watch 广播
// 红线: 取消 / 超限时删除临时文件
// ==========================================

use crate::engine::error::{PipelineError, PipelineResult};
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadState {
    pub fn is_finished(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Failed | UploadState::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    /// 0..=100
    pub progress: f64,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub status: UploadState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadProgress {
    fn new(total_bytes: u64) -> Self {
        Self {
            progress: 0.0,
            uploaded_bytes: 0,
            total_bytes,
            status: UploadState::Pending,
            error: None,
        }
    }

    fn advance(&mut self, bytes: u64) {
        self.uploaded_bytes += bytes;
        self.status = UploadState::Uploading;
        self.progress = if self.total_bytes == 0 {
            0.0
        } else {
            (self.uploaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        };
    }
}

// ==========================================
// UploadTracker - 进度表
// ==========================================
#[derive(Default)]
pub struct UploadTracker {
    channels: Mutex<HashMap<String, watch::Sender<UploadProgress>>>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, execution_id: &str) -> Option<watch::Sender<UploadProgress>> {
        let guard = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(execution_id).cloned()
    }

    pub fn start(&self, execution_id: &str, total_bytes: u64) {
        let (tx, _rx) = watch::channel(UploadProgress::new(total_bytes));
        let mut guard = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(execution_id.to_string(), tx);
    }

    pub fn update(&self, execution_id: &str, f: impl FnOnce(&mut UploadProgress)) {
        if let Some(tx) = self.sender(execution_id) {
            tx.send_modify(f);
        }
    }

    /// 上传最终结果
    pub fn finish(&self, execution_id: &str, status: UploadState, error: Option<String>) {
        self.update(execution_id, |p| {
            if status == UploadState::Completed {
                p.progress = 100.0;
            }
            p.status = status;
            p.error = error;
        });
    }

    pub fn get(&self, execution_id: &str) -> Option<UploadProgress> {
        self.sender(execution_id).map(|tx| tx.borrow().clone())
    }

    /// 等待上传结束（完成 / 失败 / 取消）
    pub async fn wait(&self, execution_id: &str) -> Option<UploadProgress> {
        let mut rx = self.sender(execution_id)?.subscribe();
        let finished = rx.wait_for(|p| p.status.is_finished()).await.ok()?;
        Some(finished.clone())
    }

    pub fn forget(&self, execution_id: &str) {
        let mut guard = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(execution_id);
    }

    pub fn len(&self) -> usize {
        match self.channels.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ==========================================
// UploadSink - 调用方写入端
// ==========================================
pub struct UploadSink {
    execution_id: String,
    tx: mpsc::Sender<Vec<u8>>,
    handle: JoinHandle<PipelineResult<PathBuf>>,
}

impl UploadSink {
    /// 发送一个分块; worker 提前退出时返回其错误
    pub async fn send(&mut self, chunk: Vec<u8>) -> PipelineResult<()> {
        if self.tx.send(chunk).await.is_ok() {
            return Ok(());
        }
        match (&mut self.handle).await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) => Err(PipelineError::Internal(format!(
                "上传 worker 已提前结束: {}",
                self.execution_id
            ))),
            Err(e) => Err(PipelineError::Internal(format!("上传 worker 异常: {}", e))),
        }
    }

    /// 关闭写入端并等待临时文件落盘
    pub async fn finish(self) -> PipelineResult<PathBuf> {
        let UploadSink { tx, handle, .. } = self;
        drop(tx);
        handle
            .await
            .map_err(|e| PipelineError::Internal(format!("上传 worker 异常: {}", e)))?
    }

    /// 把整块字节按 chunk_size 切分送入
    pub async fn feed(&mut self, bytes: &[u8], chunk_size: usize) -> PipelineResult<()> {
        for chunk in bytes.chunks(chunk_size.max(1)) {
            self.send(chunk.to_vec()).await?;
        }
        Ok(())
    }
}

// ==========================================
// UploadWorker
// ==========================================
#[derive(Debug, Clone)]
pub struct UploadWorkerConfig {
    pub temp_dir: PathBuf,
    pub max_bytes: u64,
    pub channel_capacity: usize,
}

pub struct UploadWorker;

impl UploadWorker {
    /// 启动后台 worker
    ///
    /// # 参数
    /// - total_bytes: 预期总字节数（用于进度百分比）
    /// - cancel: 执行的取消令牌
    pub fn spawn(
        config: UploadWorkerConfig,
        execution_id: &str,
        total_bytes: u64,
        tracker: Arc<UploadTracker>,
        cancel: CancellationToken,
    ) -> UploadSink {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(config.channel_capacity.max(1));
        tracker.start(execution_id, total_bytes);

        let exec_id = execution_id.to_string();
        let handle = tokio::spawn(async move {
            let path = config.temp_dir.join(format!("{}.upload", exec_id));
            let result = receive(&config, &exec_id, &path, rx, &tracker, &cancel).await;
            if let Err(e) = &result {
                if let Err(io) = tokio::fs::remove_file(&path).await {
                    debug!(execution_id = %exec_id, error = %io, "临时文件清理跳过");
                }
                let state = if matches!(e, PipelineError::Cancelled { .. }) {
                    UploadState::Cancelled
                } else {
                    UploadState::Failed
                };
                tracker.finish(&exec_id, state, Some(e.to_string()));
            }
            result.map(|_| path)
        });

        UploadSink {
            execution_id: execution_id.to_string(),
            tx,
            handle,
        }
    }
}

async fn receive(
    config: &UploadWorkerConfig,
    execution_id: &str,
    path: &Path,
    mut rx: mpsc::Receiver<Vec<u8>>,
    tracker: &UploadTracker,
    cancel: &CancellationToken,
) -> PipelineResult<()> {
    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(RepositoryError::from)?;
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(RepositoryError::from)?;
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(execution_id, written, "上传已取消");
                return Err(PipelineError::Cancelled {
                    execution_id: execution_id.to_string(),
                    reason: "upload cancelled".to_string(),
                });
            }
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };

        written += chunk.len() as u64;
        if written > config.max_bytes {
            return Err(PipelineError::InvalidInput(format!(
                "文件超过大小上限 {} 字节",
                config.max_bytes
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(RepositoryError::from)?;
        tracker.update(execution_id, |p| p.advance(chunk.len() as u64));
    }

    file.flush()
        .await
        .map_err(RepositoryError::from)?;
    info!(execution_id, bytes = written, "上传分块接收完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_bytes: u64) -> UploadWorkerConfig {
        UploadWorkerConfig {
            temp_dir: dir.path().to_path_buf(),
            max_bytes,
            channel_capacity: 2,
        }
    }

    #[tokio::test]
    async fn test_chunks_land_in_temp_file() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(UploadTracker::new());
        let payload = b"journal_entry_id;amount\n1;10\n".to_vec();

        let mut sink = UploadWorker::spawn(
            config(&dir, 1024),
            "e1",
            payload.len() as u64,
            tracker.clone(),
            CancellationToken::new(),
        );
        sink.feed(&payload, 4).await.unwrap();
        let path = sink.finish().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), payload);
        let progress = tracker.get("e1").unwrap();
        assert_eq!(progress.uploaded_bytes, payload.len() as u64);
        assert_eq!(progress.progress, 100.0);
        assert_eq!(progress.status, UploadState::Uploading);

        tracker.finish("e1", UploadState::Completed, None);
        assert_eq!(tracker.wait("e1").await.unwrap().status, UploadState::Completed);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_and_cleaned() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(UploadTracker::new());
        let mut sink = UploadWorker::spawn(
            config(&dir, 8),
            "big",
            32,
            tracker.clone(),
            CancellationToken::new(),
        );
        let result = sink.feed(&[0u8; 32], 8).await;
        let err = match result {
            Err(e) => e,
            Ok(()) => sink.finish().await.unwrap_err(),
        };
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(!dir.path().join("big.upload").exists());
        assert_eq!(tracker.get("big").unwrap().status, UploadState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_stops_worker() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(UploadTracker::new());
        let token = CancellationToken::new();
        let sink = UploadWorker::spawn(config(&dir, 1024), "c1", 10, tracker.clone(), token.clone());
        token.cancel();
        let err = sink.finish().await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert_eq!(tracker.wait("c1").await.unwrap().status, UploadState::Cancelled);
    }
}
