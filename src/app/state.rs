// ==========================================
// 会计数据导入管道 - 应用状态
// ==========================================
// 职责: 启动时显式构造所有依赖（配置 → 目录 → 存储 → 协调器 → API）
// 红线: 无全局单例；字段目录启动后只读
// ==========================================

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{ImportApi, MappingApi, PublishApi, ValidationApi};
use crate::config::config_manager::ConfigManager;
use crate::config::settings::{ExecutionStoreKind, PipelineSettings};
use crate::domain::catalog::FieldCatalogs;
use crate::engine::coordinator::PipelineCoordinator;
use crate::repository::execution_store::ExecutionStore;
use crate::repository::file_store::FileExecutionStore;
use crate::repository::loader_backend::LoaderBackend;
use crate::repository::memory_store::MemoryExecutionStore;
use crate::repository::sqlite_loader::SqliteLoaderBackend;
use crate::repository::storage::{LocalStorageBackend, StorageBackend};

/// 应用状态
///
/// 持有协调器与各 API 实例
pub struct AppState {
    pub settings: Arc<PipelineSettings>,
    pub catalogs: Arc<FieldCatalogs>,
    pub store_kind: ExecutionStoreKind,
    pub coordinator: Arc<PipelineCoordinator>,

    pub import_api: Arc<ImportApi>,
    pub mapping_api: Arc<MappingApi>,
    pub validation_api: Arc<ValidationApi>,
    pub publish_api: Arc<PublishApi>,
}

impl AppState {
    /// 从配置库初始化
    ///
    /// # 参数
    /// - config_db_path: 配置库（config_kv 表）路径
    ///
    /// # 返回
    /// - Err(String): 配置缺失或存储初始化失败（启动终止）
    pub async fn new(config_db_path: &str) -> Result<Self, String> {
        tracing::info!("初始化AppState，配置库: {}", config_db_path);

        let config_manager = ConfigManager::new(config_db_path)
            .map_err(|e| format!("无法打开配置库: {}", e))?;
        let settings = PipelineSettings::load(&config_manager)
            .await
            .map_err(|e| format!("配置加载失败: {}", e))?;

        Self::from_settings(settings, ExecutionStoreKind::detect()).await
    }

    /// 按配置快照构造本地依赖
    pub async fn from_settings(
        settings: PipelineSettings,
        store_kind: ExecutionStoreKind,
    ) -> Result<Self, String> {
        let catalogs = settings
            .load_catalogs()
            .map_err(|e| format!("字段目录加载失败: {}", e))?;

        let store: Arc<dyn ExecutionStore> = match store_kind {
            ExecutionStoreKind::Memory => Arc::new(MemoryExecutionStore::new()),
            ExecutionStoreKind::File => Arc::new(
                FileExecutionStore::open(settings.exec_store_dir.clone())
                    .await
                    .map_err(|e| format!("无法打开执行记录目录: {}", e))?,
            ),
        };

        let storage: Arc<dyn StorageBackend> =
            Arc::new(LocalStorageBackend::new(settings.storage_root.clone()));

        if let Some(parent) = settings.loader_db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("无法创建加载库目录 {}: {}", parent.display(), e))?;
        }
        let loader = SqliteLoaderBackend::open(
            &settings.loader_db_path.to_string_lossy(),
            storage.clone(),
            &settings.containers.results,
        )
        .map_err(|e| format!("无法打开加载库: {}", e))?;

        tracing::info!(
            store = store.backend_name(),
            storage_root = %settings.storage_root.display(),
            "执行记录存储已选定"
        );
        let mut state = Self::with_components(settings, catalogs, store, storage, Arc::new(loader));
        state.store_kind = store_kind;
        Ok(state)
    }

    /// 由调用方注入全部依赖（测试 / 嵌入式使用）
    pub fn with_components(
        settings: PipelineSettings,
        catalogs: FieldCatalogs,
        store: Arc<dyn ExecutionStore>,
        storage: Arc<dyn StorageBackend>,
        loader: Arc<dyn LoaderBackend>,
    ) -> Self {
        let settings = Arc::new(settings);
        let catalogs = Arc::new(catalogs);
        let coordinator = Arc::new(PipelineCoordinator::new(
            store,
            storage,
            loader,
            catalogs.clone(),
            settings.clone(),
        ));

        Self {
            settings,
            catalogs,
            store_kind: ExecutionStoreKind::Memory,
            import_api: Arc::new(ImportApi::new(coordinator.clone())),
            mapping_api: Arc::new(MappingApi::new(coordinator.clone())),
            validation_api: Arc::new(ValidationApi::new(coordinator.clone())),
            publish_api: Arc::new(PublishApi::new(coordinator.clone())),
            coordinator,
        }
    }
}

// ==========================================
// 默认配置库路径
// ==========================================

/// 获取默认配置库路径
///
/// # 返回
/// - 环境变量 INGESTA_CONFIG_DB（若设置）
/// - 否则: 用户本地数据目录/contabilidad-ingesta/config.db
pub fn get_default_config_db_path() -> String {
    if let Ok(path) = std::env::var("INGESTA_CONFIG_DB") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./config.db");
    if let Some(data_dir) = dirs::data_local_dir() {
        let dir = data_dir.join("contabilidad-ingesta");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("config.db");
        }
    }
    path.to_string_lossy().to_string()
}
