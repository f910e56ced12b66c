// ==========================================
// 会计数据导入管道 - 执行级互斥锁
// ==========================================
// 红线: 同一执行的阶段不可并发重入；配对加锁按 ID 排序，避免死锁
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ExecutionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// 持有期间独占该执行
pub type ExecutionGuard = OwnedMutexGuard<()>;

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &str) -> Arc<AsyncMutex<()>> {
        // 中毒的表只可能来自 panic 中的 insert，数据仍然可用
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn lock(&self, id: &str) -> ExecutionGuard {
        self.handle(id).lock_owned().await
    }

    /// 同时锁定配对的两个执行
    pub async fn lock_pair(&self, a: &str, b: &str) -> (ExecutionGuard, Option<ExecutionGuard>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let g1 = self.lock(first).await;
        let g2 = self.lock(second).await;
        (g1, Some(g2))
    }

    /// 释放空闲的锁表项; 仍有持有者或等待者时保留并返回 false
    pub fn forget(&self, id: &str) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        match locks.get(id) {
            Some(handle) if Arc::strong_count(handle) > 1 => false,
            Some(_) => {
                locks.remove(id);
                true
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
