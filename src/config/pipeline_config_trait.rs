// ==========================================
// 会计数据导入管道 - 管道配置读取 Trait
// ==========================================
// 职责: 定义管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use std::error::Error;

/// 配置读取结果
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// PipelineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait PipelineConfigReader: Send + Sync {
    // ===== 上传 =====

    /// 允许的扩展名（小写，不含点）
    ///
    /// # 默认值
    /// - csv, xlsx, xls, txt
    async fn get_allowed_extensions(&self) -> ConfigResult<Vec<String>>;

    /// 单文件上限（字节）
    ///
    /// # 默认值
    /// - 200 MiB
    async fn get_max_upload_bytes(&self) -> ConfigResult<u64>;

    /// 后台上传分块大小
    ///
    /// # 默认值
    /// - 1 MiB
    async fn get_upload_chunk_bytes(&self) -> ConfigResult<usize>;

    // ===== 重试 / 超时 =====

    /// 存储与加载器调用的最大尝试次数（含首次）
    ///
    /// # 默认值
    /// - 3
    async fn get_retry_max_attempts(&self) -> ConfigResult<u32>;

    /// 指数退避基准延迟（毫秒）
    ///
    /// # 默认值
    /// - 200
    async fn get_retry_base_delay_ms(&self) -> ConfigResult<u64>;

    /// 单阶段超时（秒）
    ///
    /// # 默认值
    /// - 600
    async fn get_stage_timeout_secs(&self) -> ConfigResult<u64>;

    // ===== 输出 =====

    /// Sumas y Saldos CSV 分隔符
    ///
    /// # 默认值
    /// - ';'
    async fn get_trial_balance_delimiter(&self) -> ConfigResult<u8>;

    /// 配对校验通过后是否自动发布并触发加载器
    ///
    /// # 默认值
    /// - true
    async fn get_auto_publish(&self) -> ConfigResult<bool>;

    /// Libro Diario 是否必须等待 Sumas y Saldos 才能发布
    ///
    /// # 默认值
    /// - true（false 时单文件模式，无子执行的配对直接可发布）
    async fn get_require_trial_balance(&self) -> ConfigResult<bool>;

    /// 存储容器名 (uploads, mapeos, results)
    async fn get_container_names(&self) -> ConfigResult<(String, String, String)>;

    // ===== 路径 =====

    /// 读取路径类配置（未配置或为空返回 None）
    async fn get_path(&self, key: &str) -> ConfigResult<Option<String>>;
}
