// ==========================================
// 会计数据导入管道 - 取消与超时
// ==========================================
// 职责: 每个执行一个 CancellationToken，挂起点检查
// 超时: 走取消路径，reason = "timeout"
// ==========================================

use crate::engine::error::{PipelineError, PipelineResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_USER: &str = "user";

struct Entry {
    token: CancellationToken,
    reason: Option<String>,
}

#[derive(Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// 获取（必要时创建）执行的取消令牌
    pub fn token(&self, execution_id: &str) -> CancellationToken {
        self.with_entries(|entries| {
            entries
                .entry(execution_id.to_string())
                .or_insert_with(|| Entry {
                    token: CancellationToken::new(),
                    reason: None,
                })
                .token
                .clone()
        })
    }

    /// 取消执行; 已取消时返回 false
    pub fn cancel(&self, execution_id: &str, reason: &str) -> bool {
        let first = self.with_entries(|entries| {
            let entry = entries.entry(execution_id.to_string()).or_insert_with(|| Entry {
                token: CancellationToken::new(),
                reason: None,
            });
            if entry.token.is_cancelled() {
                return false;
            }
            entry.reason = Some(reason.to_string());
            entry.token.cancel();
            true
        });
        if first {
            info!(execution_id, reason, "执行已取消");
        }
        first
    }

    pub fn is_cancelled(&self, execution_id: &str) -> bool {
        self.with_entries(|entries| {
            entries
                .get(execution_id)
                .map(|e| e.token.is_cancelled())
                .unwrap_or(false)
        })
    }

    pub fn reason(&self, execution_id: &str) -> Option<String> {
        self.with_entries(|entries| entries.get(execution_id).and_then(|e| e.reason.clone()))
    }

    /// 挂起点检查
    pub fn check(&self, execution_id: &str) -> PipelineResult<()> {
        if self.is_cancelled(execution_id) {
            return Err(PipelineError::Cancelled {
                execution_id: execution_id.to_string(),
                reason: self.reason(execution_id).unwrap_or_else(|| REASON_USER.to_string()),
            });
        }
        Ok(())
    }

    /// 执行删除或进入终态时清理
    pub fn forget(&self, execution_id: &str) {
        self.with_entries(|entries| {
            entries.remove(execution_id);
        });
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 在取消令牌与超时约束下运行阶段
    ///
    /// # 返回
    /// - 超时: 标记取消（reason = timeout）并返回 Cancelled
    /// - 外部取消: 返回 Cancelled
    pub async fn run_stage<T, Fut>(
        &self,
        execution_id: &str,
        timeout: Duration,
        stage: Fut,
    ) -> PipelineResult<T>
    where
        Fut: Future<Output = PipelineResult<T>>,
    {
        self.check(execution_id)?;
        let token = self.token(execution_id);

        tokio::select! {
            _ = token.cancelled() => Err(PipelineError::Cancelled {
                execution_id: execution_id.to_string(),
                reason: self.reason(execution_id).unwrap_or_else(|| REASON_USER.to_string()),
            }),
            outcome = tokio::time::timeout(timeout, stage) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(execution_id, timeout_secs = timeout.as_secs(), "阶段超时");
                    self.cancel(execution_id, REASON_TIMEOUT);
                    Err(PipelineError::Cancelled {
                        execution_id: execution_id.to_string(),
                        reason: REASON_TIMEOUT.to_string(),
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_observed_once() {
        let registry = CancellationRegistry::new();
        let token = registry.token("e1");
        assert!(registry.check("e1").is_ok());
        assert!(registry.cancel("e1", REASON_USER));
        assert!(!registry.cancel("e1", "again"));
        assert!(token.is_cancelled());
        assert_eq!(registry.reason("e1").as_deref(), Some(REASON_USER));
        assert!(matches!(registry.check("e1"), Err(PipelineError::Cancelled { .. })));

        registry.forget("e1");
        assert!(!registry.is_cancelled("e1"));
    }

    #[tokio::test]
    async fn test_stage_timeout_follows_cancel_path() {
        let registry = CancellationRegistry::new();
        let result: PipelineResult<()> = registry
            .run_stage("slow", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        match result {
            Err(PipelineError::Cancelled { reason, .. }) => assert_eq!(reason, REASON_TIMEOUT),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(registry.is_cancelled("slow"));
    }

    #[tokio::test]
    async fn test_stage_completes_within_timeout() {
        let registry = CancellationRegistry::new();
        let value = registry
            .run_stage("fast", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
