// ==========================================
// 会计数据导入管道 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::pipeline_config_trait::{ConfigResult, PipelineConfigReader};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const CONFIG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (scope_id, key)
);
"#;

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    pub const ALLOWED_EXTENSIONS: &str = "allowed_extensions";
    pub const MAX_UPLOAD_BYTES: &str = "max_upload_bytes";
    pub const UPLOAD_CHUNK_BYTES: &str = "upload_chunk_bytes";
    pub const RETRY_MAX_ATTEMPTS: &str = "retry_max_attempts";
    pub const RETRY_BASE_DELAY_MS: &str = "retry_base_delay_ms";
    pub const STAGE_TIMEOUT_SECS: &str = "stage_timeout_secs";
    pub const TRIAL_BALANCE_DELIMITER: &str = "trial_balance_delimiter";
    pub const AUTO_PUBLISH: &str = "auto_publish";
    pub const REQUIRE_TRIAL_BALANCE: &str = "require_trial_balance";
    pub const CONTAINER_UPLOADS: &str = "container_uploads";
    pub const CONTAINER_MAPEOS: &str = "container_mapeos";
    pub const CONTAINER_RESULTS: &str = "container_results";
    pub const JOURNAL_CATALOG_PATH: &str = "journal_catalog_path";
    pub const TRIAL_BALANCE_CATALOG_PATH: &str = "trial_balance_catalog_path";
    pub const EXEC_STORE_DIR: &str = "exec_store_dir";
    pub const TEMP_DIR: &str = "temp_dir";
    pub const STORAGE_ROOT: &str = "storage_root";
    pub const LOADER_DB_PATH: &str = "loader_db_path";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 内存库（测试 / 全默认值运行）
    pub fn in_memory() -> ConfigResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从已有连接创建 ConfigManager（建表幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
            conn_guard.execute_batch(CONFIG_SCHEMA)?;
        }
        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值（空字符串视为未配置）
    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self
            .get_config_value(key)?
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    fn get_number_or_default<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> ConfigResult<T> {
        let value = self.get_config_value(key)?;
        Ok(match value {
            Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
                tracing::warn!(config_key = key, raw_value = %raw, "配置值格式错误，使用默认值");
                default
            }),
            None => default,
        })
    }

    /// 获取所有 global 配置的快照（JSON）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从配置快照恢复（覆盖现有 global 配置）
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> ConfigResult<usize> {
        let config_map: HashMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }
        tx.commit()?;

        Ok(count)
    }
}

// ==========================================
// PipelineConfigReader Trait 实现
// ==========================================
#[async_trait]
impl PipelineConfigReader for ConfigManager {
    // ===== 上传 =====

    async fn get_allowed_extensions(&self) -> ConfigResult<Vec<String>> {
        let value = self.get_config_or_default(config_keys::ALLOWED_EXTENSIONS, "csv,xlsx,xls,txt")?;
        let exts: Vec<String> = value
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if exts.is_empty() {
            Ok(vec!["csv".into(), "xlsx".into(), "xls".into(), "txt".into()])
        } else {
            Ok(exts)
        }
    }

    async fn get_max_upload_bytes(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::MAX_UPLOAD_BYTES, 200 * 1024 * 1024)
    }

    async fn get_upload_chunk_bytes(&self) -> ConfigResult<usize> {
        let value = self.get_number_or_default(config_keys::UPLOAD_CHUNK_BYTES, 1024 * 1024)?;
        Ok(value.max(1))
    }

    // ===== 重试 / 超时 =====

    async fn get_retry_max_attempts(&self) -> ConfigResult<u32> {
        let value = self.get_number_or_default(config_keys::RETRY_MAX_ATTEMPTS, 3u32)?;
        Ok(value.max(1))
    }

    async fn get_retry_base_delay_ms(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::RETRY_BASE_DELAY_MS, 200)
    }

    async fn get_stage_timeout_secs(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::STAGE_TIMEOUT_SECS, 600)
    }

    // ===== 输出 =====

    async fn get_trial_balance_delimiter(&self) -> ConfigResult<u8> {
        let value = self.get_config_or_default(config_keys::TRIAL_BALANCE_DELIMITER, ";")?;
        match value.trim() {
            "," => Ok(b','),
            ";" => Ok(b';'),
            other => {
                tracing::warn!(raw_value = %other, "Sumas y Saldos 分隔符只支持 ';' 或 ','，使用 ';'");
                Ok(b';')
            }
        }
    }

    async fn get_auto_publish(&self) -> ConfigResult<bool> {
        let value = self.get_config_or_default(config_keys::AUTO_PUBLISH, "true")?;
        Ok(matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }

    async fn get_require_trial_balance(&self) -> ConfigResult<bool> {
        let value = self.get_config_or_default(config_keys::REQUIRE_TRIAL_BALANCE, "true")?;
        Ok(matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }

    async fn get_container_names(&self) -> ConfigResult<(String, String, String)> {
        Ok((
            self.get_config_or_default(config_keys::CONTAINER_UPLOADS, "uploads")?,
            self.get_config_or_default(config_keys::CONTAINER_MAPEOS, "mapeos")?,
            self.get_config_or_default(config_keys::CONTAINER_RESULTS, "results")?,
        ))
    }

    // ===== 路径 =====

    async fn get_path(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.get_config_value(key)?.filter(|v| !v.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_without_rows() {
        let config = ConfigManager::in_memory().unwrap();
        assert_eq!(
            config.get_allowed_extensions().await.unwrap(),
            vec!["csv", "xlsx", "xls", "txt"]
        );
        assert_eq!(config.get_max_upload_bytes().await.unwrap(), 200 * 1024 * 1024);
        assert_eq!(config.get_retry_max_attempts().await.unwrap(), 3);
        assert_eq!(config.get_trial_balance_delimiter().await.unwrap(), b';');
        assert!(config.get_auto_publish().await.unwrap());
        assert_eq!(
            config.get_container_names().await.unwrap(),
            ("uploads".to_string(), "mapeos".to_string(), "results".to_string())
        );
    }

    #[tokio::test]
    async fn test_overrides_and_bad_values() {
        let config = ConfigManager::in_memory().unwrap();
        config.set_global_config_value(config_keys::ALLOWED_EXTENSIONS, ".CSV, txt").unwrap();
        config.set_global_config_value(config_keys::RETRY_MAX_ATTEMPTS, "abc").unwrap();
        config.set_global_config_value(config_keys::AUTO_PUBLISH, "false").unwrap();
        config.set_global_config_value(config_keys::TRIAL_BALANCE_DELIMITER, ",").unwrap();

        assert_eq!(config.get_allowed_extensions().await.unwrap(), vec!["csv", "txt"]);
        assert_eq!(config.get_retry_max_attempts().await.unwrap(), 3);
        assert!(!config.get_auto_publish().await.unwrap());
        assert_eq!(config.get_trial_balance_delimiter().await.unwrap(), b',');
    }

    #[test]
    fn test_snapshot_restore() {
        let source = ConfigManager::in_memory().unwrap();
        source.set_global_config_value(config_keys::STAGE_TIMEOUT_SECS, "30").unwrap();
        let snapshot = source.get_config_snapshot().unwrap();

        let target = ConfigManager::in_memory().unwrap();
        assert_eq!(target.restore_config_from_snapshot(&snapshot).unwrap(), 1);
        assert_eq!(
            target.get_global_config_value(config_keys::STAGE_TIMEOUT_SECS).unwrap(),
            Some("30".to_string())
        );
    }
}
