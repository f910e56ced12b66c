// ==========================================
// 会计数据导入管道 - 指数退避重试
// ==========================================
// 职责: 存储 / 数据库暂不可用时按指数退避重试
// 规则: 只重试 is_retryable() 的错误，其余立即返回
// ==========================================

use crate::engine::error::PipelineResult;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// 下一次等待时长，封顶 max_delay
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    /// 执行操作，暂时性错误按退避重试
    ///
    /// # 参数
    /// - operation: 日志中的操作名
    /// - cancel: 等待期间被取消则返回最后一次错误
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: Option<&CancellationToken>,
        mut f: F,
    ) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1u32;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "暂时性错误，准备重试"
                    );
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(e),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    delay = self.next_delay(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
