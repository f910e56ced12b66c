// ==========================================
// 会计数据导入管道 - 加载器桥接 (C11)
// ==========================================
// 职责: 配对发布完成后调用下游加载器，翻译结果信封
// 幂等: 以父执行 ID 为键，同一配对只真正调用一次
// 红线: 加载失败不回滚已发布 CSV
// ==========================================

use crate::domain::execution::{LoadResult, PrincipalContext, ProjectContext, PublishedPaths};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::retry::RetryPolicy;
use crate::repository::loader_backend::{LoaderBackend, LoaderRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

pub struct LoaderBridge {
    backend: Arc<dyn LoaderBackend>,
    retry: RetryPolicy,
    results: Mutex<HashMap<String, Arc<OnceCell<LoadResult>>>>,
}

impl LoaderBridge {
    pub fn new(backend: Arc<dyn LoaderBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            results: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<LoadResult>> {
        let mut guard = match self.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(key.to_string()).or_default().clone()
    }

    /// 已记录的加载结果
    pub fn cached(&self, parent_execution_id: &str) -> Option<LoadResult> {
        self.cell(parent_execution_id).get().cloned()
    }

    /// 调用加载器（幂等）
    ///
    /// # 参数
    /// - parent_execution_id: 配对的父执行 ID（幂等键）
    /// - published: 配对已发布的全部路径
    ///
    /// # 返回
    /// - Ok(LoadResult): 成功或带错误信封的业务失败
    /// - Err: 基础设施不可用（已按策略重试）
    #[instrument(skip(self, principal, project, published), fields(user = %principal.auth_user_id))]
    pub async fn run_load(
        &self,
        parent_execution_id: &str,
        principal: &PrincipalContext,
        project: &ProjectContext,
        published: PublishedPaths,
    ) -> PipelineResult<LoadResult> {
        if published.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "配对 {} 没有已发布的文件，不能调用加载器",
                parent_execution_id
            )));
        }

        let request = LoaderRequest {
            auth_user_id: principal.auth_user_id.clone(),
            execution_id: parent_execution_id.to_string(),
            project_id: project.project_id.clone(),
            tenant_id: principal.tenant_id.clone().or_else(|| project.tenant_id.clone()),
            workspace_id: principal
                .workspace_id
                .clone()
                .or_else(|| project.workspace_id.clone()),
            published,
        };

        let cell = self.cell(parent_execution_id);
        let request = &request;
        let result = cell
            .get_or_try_init(|| async {
                self.retry
                    .run("loader.run_load", None, || async move {
                        self.backend.run_load(request).await.map_err(PipelineError::from)
                    })
                    .await
            })
            .await?
            .clone();

        match &result.error {
            None => info!(load_id = ?result.generated_id, "加载器执行成功"),
            Some(envelope) => warn!(
                code = %envelope.error_code,
                message = %envelope.error_message,
                "加载器返回业务错误"
            ),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::LoaderErrorEnvelope;
    use crate::repository::error::{RepositoryError, RepositoryResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingBackend {
        calls: AtomicUsize,
        fail_first: usize,
        envelope: Option<LoaderErrorEnvelope>,
    }

    #[async_trait]
    impl LoaderBackend for CountingBackend {
        async fn run_load(&self, request: &LoaderRequest) -> RepositoryResult<LoadResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(RepositoryError::DatabaseConnectionError("down".into()));
            }
            Ok(LoadResult {
                generated_id: Some(format!("load-{}", request.execution_id)),
                error: self.envelope.clone(),
            })
        }
    }

    fn bridge(backend: Arc<CountingBackend>) -> LoaderBridge {
        LoaderBridge::new(backend, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    fn published() -> PublishedPaths {
        PublishedPaths {
            journal_header: Some("p/e/je/e-je-cabecera.csv".into()),
            journal_detail: Some("p/e/je/e-je-detalle.csv".into()),
            trial_balance: None,
        }
    }

    fn principal() -> PrincipalContext {
        PrincipalContext {
            auth_user_id: "u1".into(),
            ..Default::default()
        }
    }

    fn project() -> ProjectContext {
        ProjectContext {
            project_id: "p".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_idempotent_per_parent() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            envelope: None,
        });
        let bridge = bridge(backend.clone());

        let first = bridge.run_load("e", &principal(), &project(), published()).await.unwrap();
        let second = bridge.run_load("e", &principal(), &project(), published()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.cached("e").unwrap().generated_id.as_deref(), Some("load-e"));
    }

    #[tokio::test]
    async fn test_database_outage_retried() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            envelope: None,
        });
        let result = bridge(backend.clone())
            .run_load("e", &principal(), &project(), published())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_envelope_is_returned_not_raised() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            envelope: Some(LoaderErrorEnvelope {
                error_code: "LOAD_ORPHAN_DETAIL".into(),
                error_message: "detalle sin cabecera".into(),
                error_title: None,
                error_severity: Some(16),
                error_category: Some("Validation".into()),
            }),
        });
        let result = bridge(backend)
            .run_load("e", &principal(), &project(), published())
            .await
            .unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_nothing_published_is_rejected() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            envelope: None,
        });
        let err = bridge(backend)
            .run_load("e", &principal(), &project(), PublishedPaths::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
