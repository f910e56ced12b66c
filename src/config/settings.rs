// ==========================================
// 会计数据导入管道 - 启动配置快照
// ==========================================
// 职责: 启动时一次性解析配置，之后只读
// 红线: 显式配置的目录文件不存在 → ConfigMissing（启动失败）
// ==========================================

use crate::config::config_manager::config_keys;
use crate::config::pipeline_config_trait::PipelineConfigReader;
use crate::domain::catalog::{CatalogLoadError, FieldCatalogs};
use crate::domain::types::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const APP_DIR: &str = "contabilidad-ingesta";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("缺少必需配置: {0}")]
    ConfigMissing(String),

    #[error("配置读取失败: {0}")]
    ReadError(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::ConfigMissing(_) => ErrorKind::ConfigMissing,
            ConfigError::ReadError(_) => ErrorKind::Internal,
        }
    }
}

impl From<CatalogLoadError> for ConfigError {
    fn from(err: CatalogLoadError) -> Self {
        ConfigError::ConfigMissing(err.to_string())
    }
}

/// 存储容器名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNames {
    pub uploads: String,
    pub mapeos: String,
    pub results: String,
}

impl Default for ContainerNames {
    fn default() -> Self {
        Self {
            uploads: "uploads".to_string(),
            mapeos: "mapeos".to_string(),
            results: "results".to_string(),
        }
    }
}

// ==========================================
// ExecutionStoreKind - 执行记录存储选择
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStoreKind {
    Memory,
    File,
}

impl ExecutionStoreKind {
    /// 检测到容器运行环境时使用文件存储
    pub fn detect() -> Self {
        Self::detect_with(|key| std::env::var(key).ok(), Path::new("/.dockerenv").exists())
    }

    pub fn detect_with(env: impl Fn(&str) -> Option<String>, dockerenv_exists: bool) -> Self {
        let set = |key: &str| env(key).map(|v| !v.trim().is_empty()).unwrap_or(false);
        let flagged = env("INGESTA_CONTAINER").map(|v| v.trim() == "1").unwrap_or(false);
        if set("KUBERNETES_SERVICE_HOST") || set("CONTAINER_APP_NAME") || flagged || dockerenv_exists {
            ExecutionStoreKind::File
        } else {
            ExecutionStoreKind::Memory
        }
    }
}

// ==========================================
// PipelineSettings
// ==========================================
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub upload_chunk_bytes: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub stage_timeout: Duration,
    pub trial_balance_delimiter: u8,
    pub auto_publish: bool,
    /// false = 单文件模式（Libro Diario 不等待 Sumas y Saldos）
    pub require_trial_balance: bool,
    pub containers: ContainerNames,
    pub journal_catalog_path: Option<PathBuf>,
    pub trial_balance_catalog_path: Option<PathBuf>,
    pub exec_store_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub storage_root: PathBuf,
    pub loader_db_path: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            allowed_extensions: vec!["csv".into(), "xlsx".into(), "xls".into(), "txt".into()],
            max_upload_bytes: 200 * 1024 * 1024,
            upload_chunk_bytes: 1024 * 1024,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
            stage_timeout: Duration::from_secs(600),
            trial_balance_delimiter: b';',
            auto_publish: true,
            require_trial_balance: true,
            containers: ContainerNames::default(),
            journal_catalog_path: None,
            trial_balance_catalog_path: None,
            exec_store_dir: data_dir.join("executions"),
            temp_dir: std::env::temp_dir().join(APP_DIR),
            storage_root: data_dir.join("storage"),
            loader_db_path: data_dir.join("loader.db"),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

impl PipelineSettings {
    /// 从配置源解析快照
    pub async fn load(reader: &dyn PipelineConfigReader) -> Result<Self, ConfigError> {
        let read = |e: Box<dyn std::error::Error + Send + Sync>| ConfigError::ReadError(e.to_string());
        let defaults = Self::default();
        let (uploads, mapeos, results) = reader.get_container_names().await.map_err(read)?;
        let path = |raw: Option<String>, fallback: PathBuf| raw.map(PathBuf::from).unwrap_or(fallback);

        let settings = Self {
            allowed_extensions: reader.get_allowed_extensions().await.map_err(read)?,
            max_upload_bytes: reader.get_max_upload_bytes().await.map_err(read)?,
            upload_chunk_bytes: reader.get_upload_chunk_bytes().await.map_err(read)?,
            retry_max_attempts: reader.get_retry_max_attempts().await.map_err(read)?,
            retry_base_delay: Duration::from_millis(reader.get_retry_base_delay_ms().await.map_err(read)?),
            stage_timeout: Duration::from_secs(reader.get_stage_timeout_secs().await.map_err(read)?),
            trial_balance_delimiter: reader.get_trial_balance_delimiter().await.map_err(read)?,
            auto_publish: reader.get_auto_publish().await.map_err(read)?,
            require_trial_balance: reader.get_require_trial_balance().await.map_err(read)?,
            containers: ContainerNames {
                uploads,
                mapeos,
                results,
            },
            journal_catalog_path: reader
                .get_path(config_keys::JOURNAL_CATALOG_PATH)
                .await
                .map_err(read)?
                .map(PathBuf::from),
            trial_balance_catalog_path: reader
                .get_path(config_keys::TRIAL_BALANCE_CATALOG_PATH)
                .await
                .map_err(read)?
                .map(PathBuf::from),
            exec_store_dir: path(
                reader.get_path(config_keys::EXEC_STORE_DIR).await.map_err(read)?,
                defaults.exec_store_dir,
            ),
            temp_dir: path(reader.get_path(config_keys::TEMP_DIR).await.map_err(read)?, defaults.temp_dir),
            storage_root: path(
                reader.get_path(config_keys::STORAGE_ROOT).await.map_err(read)?,
                defaults.storage_root,
            ),
            loader_db_path: path(
                reader.get_path(config_keys::LOADER_DB_PATH).await.map_err(read)?,
                defaults.loader_db_path,
            ),
        };

        for configured in [&settings.journal_catalog_path, &settings.trial_balance_catalog_path]
            .into_iter()
            .flatten()
        {
            if !configured.exists() {
                return Err(ConfigError::ConfigMissing(format!(
                    "字段目录文件不存在: {}",
                    configured.display()
                )));
            }
        }

        info!(
            extensions = ?settings.allowed_extensions,
            max_upload_bytes = settings.max_upload_bytes,
            auto_publish = settings.auto_publish,
            "管道配置已加载"
        );
        Ok(settings)
    }

    /// 加载字段目录（未配置路径时使用内置目录）
    pub fn load_catalogs(&self) -> Result<FieldCatalogs, ConfigError> {
        Ok(FieldCatalogs::load(
            self.journal_catalog_path.as_deref(),
            self.trial_balance_catalog_path.as_deref(),
        )?)
    }

    /// 扩展名是否允许（大小写不敏感）
    pub fn is_extension_allowed(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.allowed_extensions.iter().any(|e| *e == ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_manager::ConfigManager;
    use std::collections::HashMap;

    #[test]
    fn test_store_kind_detection() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            let map: HashMap<&str, &str> = pairs.iter().copied().collect();
            move |k: &str| map.get(k).map(|v| v.to_string())
        };
        assert_eq!(ExecutionStoreKind::detect_with(env(&[]), false), ExecutionStoreKind::Memory);
        assert_eq!(
            ExecutionStoreKind::detect_with(env(&[("KUBERNETES_SERVICE_HOST", "10.0.0.1")]), false),
            ExecutionStoreKind::File
        );
        assert_eq!(
            ExecutionStoreKind::detect_with(env(&[("INGESTA_CONTAINER", "0")]), false),
            ExecutionStoreKind::Memory
        );
        assert_eq!(ExecutionStoreKind::detect_with(env(&[]), true), ExecutionStoreKind::File);
    }

    #[tokio::test]
    async fn test_missing_catalog_is_fatal() {
        let config = ConfigManager::in_memory().unwrap();
        config
            .set_global_config_value(config_keys::JOURNAL_CATALOG_PATH, "/nonexistent/catalog.json")
            .unwrap();
        let err = PipelineSettings::load(&config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigMissing);
    }

    #[tokio::test]
    async fn test_defaults_and_extension_check() {
        let config = ConfigManager::in_memory().unwrap();
        let settings = PipelineSettings::load(&config).await.unwrap();
        assert!(settings.is_extension_allowed(".XLSX"));
        assert!(!settings.is_extension_allowed("pdf"));
        assert_eq!(settings.stage_timeout, Duration::from_secs(600));
        assert!(settings.load_catalogs().is_ok());
    }
}
