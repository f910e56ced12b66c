// ==========================================
// 会计数据导入管道 - 管道协调器 (C9)
// ==========================================
// 职责: 上传 → 自动映射 → 人工映射 → 校验 → 发布 → 加载器
// 依赖: ExecutionStore / StorageBackend / LoaderBackend（构造时注入）
// 红线: 同一执行的阶段串行（执行级互斥锁）；
//       配对 publish-ready 在配对锁内基于一致读取判定；
//       可恢复错误只挂到执行上，不改变状态
// ==========================================

use crate::config::settings::PipelineSettings;
use crate::domain::catalog::FieldCatalogs;
use crate::domain::execution::{
    child_execution_id, Execution, ExecutionError, ExecutionFilter, ExecutionPair,
    ExecutionUpdate, LoadResult, NewExecution, PrincipalContext, ProjectContext, PublishedPaths,
};
use crate::domain::frame::Frame;
use crate::domain::mapping::{ColumnMapping, MappingResult, UserDecisions};
use crate::domain::report::{JournalStats, TrialBalanceStats, ValidationReport};
use crate::domain::types::{ErrorKind, ExecutionStatus, FileType};
use crate::engine::cancellation::{CancellationRegistry, REASON_USER};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::journal_validator::JournalValidator;
use crate::engine::loader_bridge::LoaderBridge;
use crate::engine::results_publisher::ResultsPublisher;
use crate::engine::retry::RetryPolicy;
use crate::engine::state_machine::{PipelineEvent, StateMachine};
use crate::engine::trial_balance_validator::TrialBalanceValidator;
use crate::engine::upload_worker::{
    UploadProgress, UploadSink, UploadState, UploadTracker, UploadWorker, UploadWorkerConfig,
};
use crate::importer::csv_writer::{frame_from_csv, frame_to_csv};
use crate::importer::file_parser::{extension_of, UniversalFileParser};
use crate::importer::journal_mapper::{self, JournalMapper};
use crate::importer::journal_transformer::JournalTransformer;
use crate::importer::manual_mapping::{apply_user_decisions, ManualMappingOptions};
use crate::importer::trial_balance_mapper::{TrialBalanceMapper, REQUIRED_FIELDS};
use crate::importer::trial_balance_processor::TrialBalanceProcessor;
use crate::repository::error::RepositoryError;
use crate::repository::execution_lock::ExecutionLocks;
use crate::repository::execution_store::ExecutionStore;
use crate::repository::loader_backend::LoaderBackend;
use crate::repository::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Libro Diario 规范化 CSV 分隔符
pub const JOURNAL_MAPPED_DELIMITER: u8 = b',';

/// 映射产物阶段目录
pub const STAGE_AUTO: &str = "auto";
pub const STAGE_MANUAL: &str = "manual";

/// 加载器调用方缺失时的占位用户
const SYSTEM_USER: &str = "system";

const UPLOAD_CHANNEL_CAPACITY: usize = 8;

// ==========================================
// 请求 / 响应类型
// ==========================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub original_file_name: String,
    pub test_type: String,
    pub project_id: String,
    pub period: Option<String>,
    pub parent_execution_id: Option<String>,
    pub principal: Option<PrincipalContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub execution_id: String,
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingStats {
    Journal(JournalStats),
    TrialBalance(TrialBalanceStats),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMappingOutcome {
    pub csv_path: String,
    pub stats: MappingStats,
    pub mapping: MappingResult,
}

/// 发布被拒绝的文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefusedFile {
    pub execution_id: String,
    pub file_type: FileType,
    pub status: ExecutionStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub paths: PublishedPaths,
    pub refused: Vec<RefusedFile>,
    pub loader_result: Option<LoadResult>,
}

// ==========================================
// 对象路径
// ==========================================

/// 原始上传对象: {project}/{exec}/{Je|Sys}/{exec}_{baseName}_{Je|Sys}{ext}
pub fn raw_object_path(exec: &Execution, original_file_name: &str) -> String {
    let name = base_name(original_file_name);
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("archivo");
    let ext = extension_of(name);
    let ext = if ext.is_empty() {
        String::new()
    } else {
        format!(".{}", ext)
    };
    let tag = exec.file_type.as_str();
    format!(
        "{}/{}/{}/{}_{}_{}{}",
        exec.project_id, exec.id, tag, exec.id, stem, tag, ext
    )
}

/// 映射产物: {project}/{exec}/{Je|Sys}/{stage}/{exec}_{stage}.csv
pub fn mapped_object_path(exec: &Execution, stage: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}_{}.csv",
        exec.project_id,
        exec.id,
        exec.file_type.as_str(),
        stage,
        exec.id,
        stage
    )
}

/// 去掉客户端可能带上的目录部分（含 Windows 反斜杠）
fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name)
        .trim()
}

fn object_file_name(object_path: &str) -> String {
    object_path.rsplit('/').next().unwrap_or(object_path).to_string()
}

fn trial_balance_missing(mapping: &ColumnMapping) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|f| mapping.source_for(f).is_none())
        .map(|f| f.to_string())
        .collect()
}

fn failed_phase_names(report: &ValidationReport) -> Vec<String> {
    report
        .phases
        .iter()
        .filter(|p| !p.is_phase_valid)
        .map(|p| p.phase_name.clone())
        .collect()
}

// ==========================================
// PipelineCoordinator
// ==========================================
#[derive(Clone)]
pub struct PipelineCoordinator {
    store: Arc<dyn ExecutionStore>,
    storage: Arc<dyn StorageBackend>,
    catalogs: Arc<FieldCatalogs>,
    settings: Arc<PipelineSettings>,
    locks: Arc<ExecutionLocks>,
    cancellation: Arc<CancellationRegistry>,
    uploads: Arc<UploadTracker>,
    publisher: Arc<ResultsPublisher>,
    loader: Arc<LoaderBridge>,
    retry: RetryPolicy,
}

impl PipelineCoordinator {
    /// 创建协调器
    ///
    /// # 参数
    /// - store: 执行记录存储
    /// - storage: 对象存储（uploads / mapeos / results 容器）
    /// - loader_backend: 下游加载器
    /// - catalogs: 启动时加载的字段目录（只读）
    /// - settings: 配置快照
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        storage: Arc<dyn StorageBackend>,
        loader_backend: Arc<dyn LoaderBackend>,
        catalogs: Arc<FieldCatalogs>,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        let retry = RetryPolicy::new(settings.retry_max_attempts, settings.retry_base_delay);
        let publisher = ResultsPublisher::new(
            storage.clone(),
            catalogs.clone(),
            settings.containers.results.clone(),
            retry.clone(),
        );
        let loader = LoaderBridge::new(loader_backend, retry.clone());

        Self {
            store,
            storage,
            catalogs,
            settings,
            locks: Arc::new(ExecutionLocks::new()),
            cancellation: Arc::new(CancellationRegistry::new()),
            uploads: Arc::new(UploadTracker::new()),
            publisher: Arc::new(publisher),
            loader: Arc::new(loader),
            retry,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn catalogs(&self) -> &FieldCatalogs {
        &self.catalogs
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    fn mapped_delimiter(&self, file_type: FileType) -> u8 {
        match file_type {
            FileType::Je => JOURNAL_MAPPED_DELIMITER,
            FileType::Sys => self.settings.trial_balance_delimiter,
        }
    }

    fn temp_upload_path(&self, execution_id: &str) -> PathBuf {
        self.settings.temp_dir.join(format!("{}.upload", execution_id))
    }

    // ==========================================
    // 查询
    // ==========================================

    pub async fn execution_info(&self, execution_id: &str) -> PipelineResult<Execution> {
        self.require(execution_id).await
    }

    pub async fn coordinated(&self, execution_id: &str) -> PipelineResult<ExecutionPair> {
        let exec = self.require(execution_id).await?;
        Ok(self.store.get_coordinated(&exec.pair_parent_id()).await?)
    }

    pub async fn list(&self, filter: &ExecutionFilter) -> PipelineResult<Vec<Execution>> {
        Ok(self.store.list(filter).await?)
    }

    /// 上传进度; 进度表无记录时按执行状态推断
    pub async fn upload_progress(&self, execution_id: &str) -> PipelineResult<UploadProgress> {
        if let Some(progress) = self.uploads.get(execution_id) {
            return Ok(progress);
        }
        let exec = self.require(execution_id).await?;
        let status = match exec.status {
            ExecutionStatus::Pending => UploadState::Pending,
            ExecutionStatus::Uploading => UploadState::Uploading,
            ExecutionStatus::Failed if exec.file_path.is_none() => UploadState::Failed,
            _ => UploadState::Completed,
        };
        let progress = if status == UploadState::Completed { 100.0 } else { 0.0 };
        Ok(UploadProgress {
            progress,
            uploaded_bytes: 0,
            total_bytes: 0,
            status,
            error: exec.error.map(|e| e.message),
        })
    }

    /// 等待后台上传（含自动映射）结束
    pub async fn wait_for_upload(&self, execution_id: &str) -> PipelineResult<Execution> {
        if let Some(progress) = self.uploads.wait(execution_id).await {
            debug!(execution_id, status = ?progress.status, "后台上传结束");
        }
        self.require(execution_id).await
    }

    async fn require(&self, execution_id: &str) -> PipelineResult<Execution> {
        self.store
            .get(execution_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(execution_id.to_string()))
    }

    // ==========================================
    // 上传
    // ==========================================

    /// 接收整块文件并在后台完成上传与自动映射
    ///
    /// # 返回
    /// - 立即返回执行 ID；进度经 upload_progress / wait_for_upload 查询
    #[instrument(skip(self, request, bytes), fields(file = %request.original_file_name, bytes = bytes.len()))]
    pub async fn upload(
        &self,
        request: UploadRequest,
        bytes: Vec<u8>,
    ) -> PipelineResult<UploadReceipt> {
        if bytes.is_empty() {
            return Err(PipelineError::InvalidInput("上传文件为空".to_string()));
        }
        let (receipt, mut sink) = self.open_upload(request, bytes.len() as u64).await?;

        let this = self.clone();
        let execution_id = receipt.execution_id.clone();
        let chunk_size = self.settings.upload_chunk_bytes;
        tokio::spawn(async move {
            match sink.feed(&bytes, chunk_size).await {
                Ok(()) => match this.finish_upload(&execution_id, sink).await {
                    Ok(exec) => debug!(execution_id = %execution_id, status = %exec.status, "后台上传完成"),
                    Err(e) => warn!(execution_id = %execution_id, error = %e, "后台上传处理失败"),
                },
                Err(e) => {
                    this.record_failure(&execution_id, &e).await;
                    this.uploads
                        .finish(&execution_id, upload_state_for(&e), Some(e.to_string()));
                }
            }
            this.prune_if_terminal(&execution_id).await;
        });

        Ok(receipt)
    }

    /// 创建执行并打开流式写入端
    ///
    /// 调用方写完后必须调用 finish_upload
    pub async fn open_upload(
        &self,
        request: UploadRequest,
        total_bytes: u64,
    ) -> PipelineResult<(UploadReceipt, UploadSink)> {
        let original_name = base_name(&request.original_file_name).to_string();
        if original_name.is_empty() {
            return Err(PipelineError::InvalidInput("缺少文件名".to_string()));
        }
        let ext = extension_of(&original_name);
        if !self.settings.is_extension_allowed(&ext) {
            return Err(PipelineError::InvalidInput(format!(
                "不支持的扩展名 '{}'，允许: {}",
                ext,
                self.settings.allowed_extensions.join(", ")
            )));
        }
        if total_bytes > self.settings.max_upload_bytes {
            return Err(PipelineError::InvalidInput(format!(
                "文件大小 {} 超过上限 {} 字节",
                total_bytes, self.settings.max_upload_bytes
            )));
        }
        if request.project_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput("缺少 projectId".to_string()));
        }

        let parent_id = request
            .parent_execution_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let (file_type, period) = match &parent_id {
            Some(parent_id) => {
                let parent = self.require(parent_id).await?;
                if parent.file_type != FileType::Je {
                    return Err(PipelineError::InvalidInput(format!(
                        "父执行 {} 不是 Libro Diario",
                        parent_id
                    )));
                }
                (FileType::Sys, request.period.clone().or(parent.period))
            }
            None => (FileType::Je, request.period.clone()),
        };

        let principal = request.principal.unwrap_or_default();
        let new = NewExecution {
            file_type,
            test_type: request.test_type,
            project_id: request.project_id.trim().to_string(),
            period,
            parent_execution_id: parent_id,
            original_file_name: Some(original_name.clone()),
            auth_user_id: Some(principal.auth_user_id).filter(|u| !u.is_empty()),
            tenant_id: principal.tenant_id,
            workspace_id: principal.workspace_id,
        };
        let exec = self.store.create_coordinated(new).await?;
        let file_name = object_file_name(&raw_object_path(&exec, &original_name));

        let status = StateMachine::apply(&exec.id, exec.status, PipelineEvent::UploadStarted)?;
        let mut update = ExecutionUpdate::status(status, PipelineEvent::UploadStarted.step());
        update.file_name = Some(file_name.clone());
        self.store.update(&exec.id, update).await?;

        let sink = UploadWorker::spawn(
            UploadWorkerConfig {
                temp_dir: self.settings.temp_dir.clone(),
                max_bytes: self.settings.max_upload_bytes,
                channel_capacity: UPLOAD_CHANNEL_CAPACITY,
            },
            &exec.id,
            total_bytes,
            self.uploads.clone(),
            self.cancellation.token(&exec.id),
        );

        info!(execution_id = %exec.id, file_type = %exec.file_type, total_bytes, "上传开始");
        Ok((
            UploadReceipt {
                execution_id: exec.id,
                file_name,
                message: "文件已接收，后台处理中".to_string(),
            },
            sink,
        ))
    }

    /// 写入端关闭后: 临时文件 → uploads 容器 → 自动映射
    ///
    /// 自动映射失败不影响上传本身的结果（错误已挂到执行上）
    pub async fn finish_upload(
        &self,
        execution_id: &str,
        sink: UploadSink,
    ) -> PipelineResult<Execution> {
        let stored = self
            .cancellation
            .run_stage(
                execution_id,
                self.settings.stage_timeout,
                self.store_upload(execution_id, sink),
            )
            .await;

        if let Err(e) = stored {
            self.remove_temp(execution_id).await;
            self.record_failure(execution_id, &e).await;
            self.uploads
                .finish(execution_id, upload_state_for(&e), Some(e.to_string()));
            return Err(e);
        }

        if let Err(e) = self.auto_map(execution_id).await {
            debug!(execution_id, error = %e, "上传后自动映射未完成");
        }
        self.uploads.finish(execution_id, UploadState::Completed, None);
        self.require(execution_id).await
    }

    async fn store_upload(&self, execution_id: &str, sink: UploadSink) -> PipelineResult<Execution> {
        let temp = sink.finish().await?;
        self.cancellation.check(execution_id)?;
        let bytes = tokio::fs::read(&temp).await.map_err(RepositoryError::from)?;

        let _guard = self.locks.lock(execution_id).await;
        let exec = self.require(execution_id).await?;
        let original = exec.original_file_name.clone().unwrap_or_default();
        let object_path = raw_object_path(&exec, &original);
        let uploads = self.settings.containers.uploads.clone();
        self.put_object(execution_id, &uploads, &object_path, bytes).await?;
        self.remove_temp(execution_id).await;

        let status = StateMachine::apply(execution_id, exec.status, PipelineEvent::UploadCompleted)?;
        let mut update = ExecutionUpdate::status(status, PipelineEvent::UploadCompleted.step());
        update.file_path = Some(object_path.clone());
        if exec.file_type == FileType::Sys {
            update.sumas_saldos_raw_path = Some(object_path.clone());
        }
        let exec = self.store.update(execution_id, update).await?;

        info!(execution_id, path = %object_path, "原始文件已入库");
        Ok(exec)
    }

    // ==========================================
    // 自动映射
    // ==========================================

    /// 自动映射; 已越过映射阶段时返回已记录的结果
    #[instrument(skip(self))]
    pub async fn auto_map(&self, execution_id: &str) -> PipelineResult<MappingResult> {
        let result = self.auto_map_locked(execution_id).await;
        if result.is_err() {
            self.prune_if_terminal(execution_id).await;
        }
        result
    }

    async fn auto_map_locked(&self, execution_id: &str) -> PipelineResult<MappingResult> {
        let _guard = self.locks.lock(execution_id).await;
        let exec = self.require(execution_id).await?;

        if exec.status != ExecutionStatus::Uploaded {
            let stored = match exec.file_type {
                FileType::Je => exec.mapeo_results.clone(),
                FileType::Sys => exec.sumas_saldos_mapping.clone(),
            };
            return stored.ok_or_else(|| PipelineError::InvalidState {
                execution_id: exec.id.clone(),
                status: exec.status,
                operation: "auto-map".to_string(),
            });
        }

        let result = self
            .cancellation
            .run_stage(execution_id, self.settings.stage_timeout, self.auto_map_stage(&exec))
            .await;
        self.settle(execution_id, result).await
    }

    async fn auto_map_stage(&self, exec: &Execution) -> PipelineResult<MappingResult> {
        let (bytes, name) = self.read_raw(exec).await?;
        let mut update = ExecutionUpdate::default();

        let result = match exec.file_type {
            FileType::Je => {
                let frame = UniversalFileParser.parse_frame(&bytes, &name)?;
                let result = JournalMapper::new(&self.catalogs.journal).auto_map(&frame);
                if result.missing_required_fields.is_empty() {
                    let output = JournalTransformer::new(&self.catalogs.journal)
                        .transform(&frame, &result.mapping)?;
                    let path = mapped_object_path(exec, STAGE_AUTO);
                    self.write_mapped(exec, &path, &output.frame).await?;
                    update.auto_mapeo_output_file = Some(path.clone());
                    update.output_file = Some(path);
                    update.mapeo_stats = Some(output.stats);
                }
                update.manual_mapping_required = Some(result.requires_manual_mapping());
                update.unmapped_fields_count = Some(result.unmapped_count());
                update.mapeo_results = Some(result.clone());
                result
            }
            FileType::Sys => {
                let grid = UniversalFileParser.parse_grid(&bytes, &name)?;
                let processor = TrialBalanceProcessor::new(&self.catalogs.trial_balance);
                let prepared = processor.prepare(&grid)?;
                let result = TrialBalanceMapper::new(&self.catalogs.trial_balance)
                    .auto_map(&prepared.frame, Some(prepared.header_row));
                if result.missing_required_fields.is_empty() {
                    let output = processor.process(&prepared.frame, &result.mapping)?;
                    let path = mapped_object_path(exec, STAGE_AUTO);
                    self.write_mapped(exec, &path, &output.frame).await?;
                    update.sumas_saldos_auto_csv_path = Some(path.clone());
                    update.sumas_saldos_csv_path = Some(path);
                    update.sumas_saldos_stats = Some(output.stats);
                }
                update.sumas_saldos_manual_mapping_required = Some(result.requires_manual_mapping());
                update.sumas_saldos_unmapped_count = Some(result.unmapped_count());
                update.sumas_saldos_mapping = Some(result.clone());
                result
            }
        };

        let event = PipelineEvent::AutoMapped {
            requires_manual: result.requires_manual_mapping(),
        };
        update.status = Some(StateMachine::apply(&exec.id, exec.status, event)?);
        update.step = Some(event.step().to_string());
        self.store.update(&exec.id, update).await?;

        info!(
            execution_id = %exec.id,
            mapped = result.mapping.len(),
            unmapped = result.unmapped_count(),
            missing = ?result.missing_required_fields,
            "自动映射完成"
        );
        Ok(result)
    }

    // ==========================================
    // 人工映射
    // ==========================================

    /// 合并用户决策并重新生成规范化 CSV
    ///
    /// # 参数
    /// - decisions: {源列 → {field_type, …}}，未决策的剩余列视为忽略
    /// - options: force_override 允许抢占已占用的规范字段
    #[instrument(skip(self, decisions), fields(decisions = decisions.len()))]
    pub async fn apply_manual_mapping(
        &self,
        execution_id: &str,
        decisions: &UserDecisions,
        options: ManualMappingOptions,
    ) -> PipelineResult<ManualMappingOutcome> {
        let result = self
            .manual_mapping_locked(execution_id, decisions, options)
            .await;
        if result.is_err() {
            self.prune_if_terminal(execution_id).await;
        }
        result
    }

    async fn manual_mapping_locked(
        &self,
        execution_id: &str,
        decisions: &UserDecisions,
        options: ManualMappingOptions,
    ) -> PipelineResult<ManualMappingOutcome> {
        let _guard = self.locks.lock(execution_id).await;
        let exec = self.require(execution_id).await?;

        // 失败的执行只有在校验 / 映射问题后才允许重新映射
        let remappable = exec.status != ExecutionStatus::Failed
            || matches!(
                exec.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::ValidationFailed | ErrorKind::MappingIncomplete)
            );
        if !remappable {
            return Err(PipelineError::InvalidState {
                execution_id: exec.id.clone(),
                status: exec.status,
                operation: PipelineEvent::ManualMappingApplied.step().to_string(),
            });
        }
        StateMachine::apply(&exec.id, exec.status, PipelineEvent::ManualMappingApplied)?;

        let result = self
            .cancellation
            .run_stage(
                execution_id,
                self.settings.stage_timeout,
                self.manual_stage(&exec, decisions, options),
            )
            .await;
        self.settle(execution_id, result).await
    }

    async fn manual_stage(
        &self,
        exec: &Execution,
        decisions: &UserDecisions,
        options: ManualMappingOptions,
    ) -> PipelineResult<ManualMappingOutcome> {
        let auto = match exec.file_type {
            FileType::Je => exec.mapeo_results.clone(),
            FileType::Sys => exec.sumas_saldos_mapping.clone(),
        }
        .ok_or_else(|| PipelineError::InvalidState {
            execution_id: exec.id.clone(),
            status: exec.status,
            operation: "manual-map (无自动映射结果)".to_string(),
        })?;

        let merged = match exec.file_type {
            FileType::Je => apply_user_decisions(
                &auto,
                decisions,
                &self.catalogs.journal.all_field_names(),
                &journal_mapper::missing_required,
                options,
            )?,
            FileType::Sys => apply_user_decisions(
                &auto,
                decisions,
                &self.catalogs.trial_balance.field_names(),
                &trial_balance_missing,
                options,
            )?,
        };

        let mut status = exec.status;
        if let Some(pending) = StateMachine::next(status, PipelineEvent::ManualMappingStarted) {
            self.store
                .update(
                    &exec.id,
                    ExecutionUpdate::status(pending, PipelineEvent::ManualMappingStarted.step()),
                )
                .await?;
            status = pending;
        }

        let (bytes, name) = self.read_raw(exec).await?;
        let path = mapped_object_path(exec, STAGE_MANUAL);
        let mapped = StateMachine::apply(&exec.id, status, PipelineEvent::ManualMappingApplied)?;
        let mut update = ExecutionUpdate::status(mapped, PipelineEvent::ManualMappingApplied.step());
        update.clear_error = Some(true);

        let stats = match exec.file_type {
            FileType::Je => {
                let frame = UniversalFileParser.parse_frame(&bytes, &name)?;
                let output = JournalTransformer::new(&self.catalogs.journal)
                    .transform(&frame, &merged.mapping)?;
                self.write_mapped(exec, &path, &output.frame).await?;
                update.manual_mapeo_output_file = Some(path.clone());
                update.output_file = Some(path.clone());
                update.mapeo_stats = Some(output.stats.clone());
                update.mapeo_results = Some(merged.clone());
                update.manual_mapping_required = Some(false);
                update.unmapped_fields_count = Some(0);
                MappingStats::Journal(output.stats)
            }
            FileType::Sys => {
                let grid = UniversalFileParser.parse_grid(&bytes, &name)?;
                let processor = TrialBalanceProcessor::new(&self.catalogs.trial_balance);
                let prepared = processor.prepare(&grid)?;
                let output = processor.process(&prepared.frame, &merged.mapping)?;
                self.write_mapped(exec, &path, &output.frame).await?;
                update.sumas_saldos_manual_csv_path = Some(path.clone());
                update.sumas_saldos_csv_path = Some(path.clone());
                update.sumas_saldos_stats = Some(output.stats.clone());
                update.sumas_saldos_mapping = Some(merged.clone());
                update.sumas_saldos_manual_mapping_required = Some(false);
                update.sumas_saldos_unmapped_count = Some(0);
                MappingStats::TrialBalance(output.stats)
            }
        };
        self.store.update(&exec.id, update).await?;

        info!(execution_id = %exec.id, path = %path, mapped = merged.mapping.len(), "人工映射已应用");
        Ok(ManualMappingOutcome {
            csv_path: path,
            stats,
            mapping: merged,
        })
    }

    // ==========================================
    // 校验
    // ==========================================

    /// 运行对应文件类型的校验; 通过后评估配对并按配置自动发布
    ///
    /// # 参数
    /// - period: 仅 Libro Diario 使用，缺省取执行记录上的期间
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        execution_id: &str,
        period: Option<&str>,
    ) -> PipelineResult<ValidationReport> {
        let report = match self.validate_locked(execution_id, period).await {
            Ok(report) => report,
            Err(e) => {
                self.prune_if_terminal(execution_id).await;
                return Err(e);
            }
        };

        if !report.all_passed() {
            self.prune_if_terminal(execution_id).await;
        } else {
            let ready = self.evaluate_pair(execution_id).await?;
            if ready && self.settings.auto_publish {
                if let Err(e) = self.publish_results(execution_id, None).await {
                    warn!(execution_id, error = %e, "自动发布失败");
                }
            }
        }
        Ok(report)
    }

    async fn validate_locked(
        &self,
        execution_id: &str,
        period: Option<&str>,
    ) -> PipelineResult<ValidationReport> {
        let _guard = self.locks.lock(execution_id).await;
        let exec = self.require(execution_id).await?;
        if exec.status == ExecutionStatus::Failed
            && exec.error.as_ref().map(|e| e.kind) != Some(ErrorKind::ValidationFailed)
        {
            return Err(PipelineError::InvalidState {
                execution_id: exec.id.clone(),
                status: exec.status,
                operation: PipelineEvent::ValidationStarted.step().to_string(),
            });
        }
        StateMachine::apply(&exec.id, exec.status, PipelineEvent::ValidationStarted)?;

        let result = self
            .cancellation
            .run_stage(
                execution_id,
                self.settings.stage_timeout,
                self.validate_stage(&exec, period),
            )
            .await;
        self.settle(execution_id, result).await
    }

    pub async fn run_journal_validations(
        &self,
        execution_id: &str,
        period: Option<&str>,
    ) -> PipelineResult<ValidationReport> {
        self.expect_file_type(execution_id, FileType::Je).await?;
        self.validate(execution_id, period).await
    }

    pub async fn run_trial_balance_validations(
        &self,
        execution_id: &str,
    ) -> PipelineResult<ValidationReport> {
        self.expect_file_type(execution_id, FileType::Sys).await?;
        self.validate(execution_id, None).await
    }

    async fn expect_file_type(&self, execution_id: &str, expected: FileType) -> PipelineResult<()> {
        let exec = self.require(execution_id).await?;
        if exec.file_type != expected {
            return Err(PipelineError::InvalidInput(format!(
                "执行 {} 的文件类型为 {}，期望 {}",
                execution_id, exec.file_type, expected
            )));
        }
        Ok(())
    }

    async fn validate_stage(
        &self,
        exec: &Execution,
        period: Option<&str>,
    ) -> PipelineResult<ValidationReport> {
        let validating = StateMachine::apply(&exec.id, exec.status, PipelineEvent::ValidationStarted)?;
        let mut start = ExecutionUpdate::status(validating, PipelineEvent::ValidationStarted.step());
        start.clear_error = Some(true);
        self.store.update(&exec.id, start).await?;

        let frame = self.load_mapped_frame(exec).await?;
        let report = match exec.file_type {
            FileType::Je => {
                let period = period.or(exec.period.as_deref());
                JournalValidator::validate(&frame, &exec.id, period)
            }
            FileType::Sys => TrialBalanceValidator::validate(&frame, &exec.id),
        };

        let passed = report.all_passed();
        let event = PipelineEvent::ValidationFinished { passed };
        let status = StateMachine::apply(&exec.id, validating, event)?;
        let mut update = ExecutionUpdate::status(status, event.step());
        match exec.file_type {
            FileType::Je => update.validation_rules_results = Some(report.clone()),
            FileType::Sys => update.sumas_saldos_validation_results = Some(report.clone()),
        }
        if !passed {
            let err = PipelineError::ValidationFailed {
                execution_id: exec.id.clone(),
                failed_phases: failed_phase_names(&report),
            };
            update.error = Some(err.to_execution_error());
        }
        self.store.update(&exec.id, update).await?;

        info!(
            execution_id = %exec.id,
            report_type = %report.report_type,
            passed,
            passed_phases = report.summary.passed_phases,
            "校验完成"
        );
        Ok(report)
    }

    // ==========================================
    // 配对就绪
    // ==========================================

    fn pair_ready(&self, pair: &ExecutionPair) -> bool {
        let ready = |s: ExecutionStatus| {
            matches!(s, ExecutionStatus::Validated | ExecutionStatus::PublishReady)
        };
        let parent_ok = pair.parent.as_ref().map(|p| ready(p.status)).unwrap_or(false);
        let child_ok = match &pair.child {
            Some(child) => ready(child.status),
            None => !self.settings.require_trial_balance,
        };
        parent_ok && child_ok
    }

    async fn pair_ids(&self, execution_id: &str) -> PipelineResult<(String, String)> {
        let exec = self.require(execution_id).await?;
        let parent_id = exec.pair_parent_id();
        let child_id = child_execution_id(&parent_id);
        Ok((parent_id, child_id))
    }

    /// 配对是否就绪; 就绪时把两个执行原子地推进到 publish-ready
    pub async fn evaluate_pair(&self, execution_id: &str) -> PipelineResult<bool> {
        let (parent_id, child_id) = self.pair_ids(execution_id).await?;
        let _guards = self.locks.lock_pair(&parent_id, &child_id).await;

        let pair = self.store.get_coordinated(&parent_id).await?;
        if !self.pair_ready(&pair) {
            debug!(parent_id = %parent_id, "兄弟执行尚未通过校验");
            return Ok(false);
        }

        for member in pair.members() {
            if member.status == ExecutionStatus::Validated {
                let status = StateMachine::apply(&member.id, member.status, PipelineEvent::PairReady)?;
                self.store
                    .update(
                        &member.id,
                        ExecutionUpdate::status(status, PipelineEvent::PairReady.step()),
                    )
                    .await?;
            }
        }
        info!(parent_id = %parent_id, has_child = pair.child.is_some(), "配对已就绪");
        Ok(true)
    }

    // ==========================================
    // 发布
    // ==========================================

    /// 发布配对中已通过校验的文件（逐文件独立）
    ///
    /// # 参数
    /// - project_id: 覆盖执行记录上的项目 ID
    ///
    /// # 返回
    /// - paths: 配对已发布的全部路径（含此前已发布的）
    /// - refused: 未通过校验或发布失败的文件
    /// - loader_result: 配对完整发布后调用加载器的结果
    #[instrument(skip(self))]
    pub async fn publish_results(
        &self,
        execution_id: &str,
        project_id: Option<&str>,
    ) -> PipelineResult<PublishOutcome> {
        let (parent_id, child_id) = self.pair_ids(execution_id).await?;

        let mut outcome = {
            let _guards = self.locks.lock_pair(&parent_id, &child_id).await;
            let pair = self.store.get_coordinated(&parent_id).await?;

            // 配对模式下只发布已由配对评估推进到 publish-ready 的文件
            if self.settings.require_trial_balance {
                if let Some(waiting) = pair
                    .members()
                    .find(|m| m.status == ExecutionStatus::Validated)
                {
                    warn!(execution_id = %waiting.id, "配对尚未就绪，拒绝发布");
                    return Err(PipelineError::InvalidState {
                        execution_id: waiting.id.clone(),
                        status: waiting.status,
                        operation: PipelineEvent::PublishStarted.step().to_string(),
                    });
                }
            }

            let mut paths = PublishedPaths::default();
            let mut refused = Vec::new();
            for member in pair.members() {
                if member.status == ExecutionStatus::Completed {
                    if let Some(existing) = &member.published_paths {
                        paths.merge(existing.clone());
                    }
                    continue;
                }
                if !member.status.has_passed_validation() {
                    warn!(execution_id = %member.id, status = %member.status, "未通过校验，跳过发布");
                    refused.push(RefusedFile {
                        execution_id: member.id.clone(),
                        file_type: member.file_type,
                        status: member.status,
                        reason: "校验未通过或尚未校验".to_string(),
                    });
                    continue;
                }

                let project = project_id
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .unwrap_or(&member.project_id);
                match self.publish_member(member, project).await {
                    Ok(published) => paths.merge(published),
                    Err(e) => {
                        self.record_failure(&member.id, &e).await;
                        refused.push(RefusedFile {
                            execution_id: member.id.clone(),
                            file_type: member.file_type,
                            status: ExecutionStatus::Failed,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            PublishOutcome {
                paths,
                refused,
                loader_result: None,
            }
        };

        if self.loader_due(&parent_id).await? {
            match self.invoke_loader(&parent_id).await {
                Ok(result) => outcome.loader_result = Some(result),
                Err(e) => warn!(parent_id = %parent_id, error = %e, "加载器调用失败，已发布结果保留"),
            }
        }
        self.prune_if_terminal(&parent_id).await;
        self.prune_if_terminal(&child_id).await;
        Ok(outcome)
    }

    async fn publish_member(&self, member: &Execution, project_id: &str) -> PipelineResult<PublishedPaths> {
        let publishing = StateMachine::apply(&member.id, member.status, PipelineEvent::PublishStarted)?;
        self.store
            .update(
                &member.id,
                ExecutionUpdate::status(publishing, PipelineEvent::PublishStarted.step()),
            )
            .await?;

        let frame = self.load_mapped_frame(member).await?;
        let mut snapshot = member.clone();
        snapshot.status = publishing;
        let paths = self
            .cancellation
            .run_stage(
                &member.id,
                self.settings.stage_timeout,
                self.publisher.publish(&snapshot, project_id, &frame),
            )
            .await?;

        let completed = StateMachine::apply(&member.id, publishing, PipelineEvent::Published)?;
        let mut update = ExecutionUpdate::status(completed, PipelineEvent::Published.step());
        update.published_paths = Some(paths.clone());
        self.store.update(&member.id, update).await?;
        Ok(paths)
    }

    /// 配对已完整发布且尚未调用过加载器
    async fn loader_due(&self, parent_id: &str) -> PipelineResult<bool> {
        let pair = self.store.get_coordinated(parent_id).await?;
        Ok(self.pair_completed(&pair)
            && pair
                .parent
                .as_ref()
                .map(|p| p.loader_result.is_none())
                .unwrap_or(false))
    }

    fn pair_completed(&self, pair: &ExecutionPair) -> bool {
        let done = |e: &Execution| e.status == ExecutionStatus::Completed;
        let parent_ok = pair.parent.as_ref().map(done).unwrap_or(false);
        let child_ok = match &pair.child {
            Some(child) => done(child),
            None => !self.settings.require_trial_balance,
        };
        parent_ok && child_ok
    }

    // ==========================================
    // 加载器
    // ==========================================

    /// 调用下游加载器（以父执行 ID 幂等）
    ///
    /// 业务错误信封记录在执行上，状态保持 completed；
    /// 基础设施错误（重试耗尽）同样记录并返回 Err
    #[instrument(skip(self))]
    pub async fn invoke_loader(&self, execution_id: &str) -> PipelineResult<LoadResult> {
        let (parent_id, child_id) = self.pair_ids(execution_id).await?;
        let _guards = self.locks.lock_pair(&parent_id, &child_id).await;

        let pair = self.store.get_coordinated(&parent_id).await?;
        let parent = pair
            .parent
            .clone()
            .ok_or_else(|| PipelineError::NotFound(parent_id.clone()))?;
        if let Some(existing) = &parent.loader_result {
            return Ok(existing.clone());
        }
        if !self.pair_completed(&pair) {
            let blocking = pair
                .members()
                .find(|m| m.status != ExecutionStatus::Completed)
                .map(|m| (m.id.clone(), m.status))
                .unwrap_or((parent.id.clone(), parent.status));
            return Err(PipelineError::InvalidState {
                execution_id: blocking.0,
                status: blocking.1,
                operation: PipelineEvent::LoaderInvoked.step().to_string(),
            });
        }

        let mut published = PublishedPaths::default();
        for member in pair.members() {
            if let Some(paths) = &member.published_paths {
                published.merge(paths.clone());
            }
        }
        let principal = PrincipalContext {
            auth_user_id: parent
                .auth_user_id
                .clone()
                .unwrap_or_else(|| SYSTEM_USER.to_string()),
            tenant_id: parent.tenant_id.clone(),
            workspace_id: parent.workspace_id.clone(),
        };
        let project = ProjectContext {
            project_id: parent.project_id.clone(),
            tenant_id: parent.tenant_id.clone(),
            workspace_id: parent.workspace_id.clone(),
        };

        match self.loader.run_load(&parent.id, &principal, &project, published).await {
            Ok(result) => {
                for member in pair.members() {
                    let status = StateMachine::apply(&member.id, member.status, PipelineEvent::LoaderInvoked)?;
                    let mut update = ExecutionUpdate::status(status, PipelineEvent::LoaderInvoked.step());
                    update.loader_result = Some(result.clone());
                    if let Some(envelope) = &result.error {
                        let reported = PipelineError::LoaderReported {
                            code: envelope.error_code.clone(),
                            message: envelope.error_message.clone(),
                        };
                        update.error = Some(reported.to_execution_error());
                    }
                    self.store.update(&member.id, update).await?;
                }
                Ok(result)
            }
            Err(e) => {
                error!(parent_id = %parent.id, error = %e, "加载器不可用");
                let update = ExecutionUpdate {
                    error: Some(e.to_execution_error()),
                    ..Default::default()
                };
                self.store.update(&parent.id, update).await?;
                Err(e)
            }
        }
    }

    // ==========================================
    // 取消 / 删除
    // ==========================================

    /// 取消执行: 在途阶段在下一个挂起点停止，状态转为 failed
    ///
    /// 已发布的结果保留
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: &str, reason: Option<&str>) -> PipelineResult<Execution> {
        let reason = reason.unwrap_or(REASON_USER);
        let exec = self.require(execution_id).await?;
        if exec.status == ExecutionStatus::Completed {
            return Err(PipelineError::InvalidState {
                execution_id: exec.id.clone(),
                status: exec.status,
                operation: PipelineEvent::Cancelled.step().to_string(),
            });
        }

        self.cancellation.cancel(execution_id, reason);
        let cancelled = {
            let _guard = self.locks.lock(execution_id).await;
            let exec = self.require(execution_id).await?;
            self.remove_temp(execution_id).await;
            self.uploads
                .finish(execution_id, UploadState::Cancelled, Some(reason.to_string()));
            if exec.status.is_terminal() {
                exec
            } else {
                let status = StateMachine::apply(execution_id, exec.status, PipelineEvent::Cancelled)?;
                let mut update = ExecutionUpdate::status(status, PipelineEvent::Cancelled.step());
                update.error = Some(ExecutionError::new(
                    ErrorKind::Cancelled,
                    format!("执行已取消: {}", reason),
                ));
                self.store.update(execution_id, update).await?
            }
        };
        self.prune_if_terminal(execution_id).await;
        Ok(cancelled)
    }

    /// 删除执行记录及其上传 / 映射产物; 已发布结果保留
    #[instrument(skip(self))]
    pub async fn delete(&self, execution_id: &str) -> PipelineResult<bool> {
        let guard = self.locks.lock(execution_id).await;
        let Some(exec) = self.store.get(execution_id).await? else {
            return Ok(false);
        };
        if !exec.status.is_terminal() {
            self.cancellation.cancel(execution_id, "deleted");
        }
        self.remove_temp(execution_id).await;

        let uploads = &self.settings.containers.uploads;
        let mapeos = &self.settings.containers.mapeos;
        let artifacts = [
            (uploads, exec.file_path.as_deref()),
            (mapeos, exec.auto_mapeo_output_file.as_deref()),
            (mapeos, exec.manual_mapeo_output_file.as_deref()),
            (mapeos, exec.sumas_saldos_auto_csv_path.as_deref()),
            (mapeos, exec.sumas_saldos_manual_csv_path.as_deref()),
        ];
        for (container, path) in artifacts {
            let Some(path) = path else { continue };
            if let Err(e) = self.storage.delete(container, path).await {
                warn!(execution_id, container = %container, path, error = %e, "产物删除失败");
            }
        }

        let deleted = self.store.delete(execution_id).await?;
        drop(guard);
        self.forget_runtime(execution_id);

        info!(execution_id, deleted, "执行已删除");
        Ok(deleted)
    }

    // ==========================================
    // 内部工具
    // ==========================================

    /// 执行进入终态后回收其锁、取消令牌与上传进度条目
    async fn prune_if_terminal(&self, execution_id: &str) {
        match self.store.get(execution_id).await {
            Ok(Some(exec)) if exec.status.is_terminal() => self.forget_runtime(execution_id),
            Ok(Some(_)) => {}
            // 配对加锁会为尚未上传的子执行建锁表项
            Ok(None) => {
                self.locks.forget(execution_id);
            }
            Err(e) => debug!(execution_id, error = %e, "读取执行失败，跳过回收"),
        }
    }

    fn forget_runtime(&self, execution_id: &str) {
        self.cancellation.forget(execution_id);
        self.uploads.forget(execution_id);
        if !self.locks.forget(execution_id) {
            debug!(execution_id, "执行锁仍在使用，保留锁表项");
        }
    }

    /// 阶段结果收尾: 错误挂到执行上，不可恢复时转 failed
    async fn settle<T>(&self, execution_id: &str, result: PipelineResult<T>) -> PipelineResult<T> {
        if let Err(e) = &result {
            self.record_failure(execution_id, e).await;
        }
        result
    }

    async fn record_failure(&self, execution_id: &str, err: &PipelineError) {
        let current = match self.store.get(execution_id).await {
            Ok(Some(exec)) => exec,
            Ok(None) => return,
            Err(e) => {
                error!(execution_id, error = %e, "读取执行失败，无法记录错误");
                return;
            }
        };

        let mut update = ExecutionUpdate {
            error: Some(err.to_execution_error()),
            ..Default::default()
        };
        if err.is_recoverable() {
            warn!(execution_id, kind = %err.kind(), error = %err, "可恢复错误，保持当前状态");
        } else {
            let event = if matches!(err, PipelineError::Cancelled { .. }) {
                PipelineEvent::Cancelled
            } else {
                PipelineEvent::Errored
            };
            if let Some(status) = StateMachine::next(current.status, event) {
                update.status = Some(status);
                update.step = Some(event.step().to_string());
            }
            error!(execution_id, kind = %err.kind(), error = %err, "阶段失败");
        }

        if let Err(e) = self.store.update(execution_id, update).await {
            error!(execution_id, error = %e, "错误记录写入失败");
        }
    }

    async fn read_raw(&self, exec: &Execution) -> PipelineResult<(Vec<u8>, String)> {
        let path = exec.file_path.clone().ok_or_else(|| PipelineError::InvalidState {
            execution_id: exec.id.clone(),
            status: exec.status,
            operation: "读取原始文件".to_string(),
        })?;
        let uploads = self.settings.containers.uploads.clone();
        let bytes = self.get_object(&exec.id, &uploads, &path).await?;
        let name = exec.file_name.clone().unwrap_or_else(|| object_file_name(&path));
        Ok((bytes, name))
    }

    async fn load_mapped_frame(&self, exec: &Execution) -> PipelineResult<Frame> {
        let path = exec
            .mapped_csv_path()
            .ok_or_else(|| PipelineError::InvalidState {
                execution_id: exec.id.clone(),
                status: exec.status,
                operation: "读取规范化 CSV".to_string(),
            })?
            .to_string();
        let mapeos = self.settings.containers.mapeos.clone();
        let bytes = self.get_object(&exec.id, &mapeos, &path).await?;
        Ok(frame_from_csv(&bytes, self.mapped_delimiter(exec.file_type), &path)?)
    }

    async fn write_mapped(&self, exec: &Execution, path: &str, frame: &Frame) -> PipelineResult<()> {
        let bytes = frame_to_csv(frame, self.mapped_delimiter(exec.file_type))?;
        let mapeos = self.settings.containers.mapeos.clone();
        self.put_object(&exec.id, &mapeos, path, bytes).await
    }

    async fn put_object(
        &self,
        execution_id: &str,
        container: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> PipelineResult<()> {
        let token = self.cancellation.token(execution_id);
        self.retry
            .run("storage.put", Some(&token), || {
                let bytes = bytes.clone();
                async move {
                    self.storage
                        .put(container, path, bytes)
                        .await
                        .map_err(PipelineError::from)
                }
            })
            .await?;
        Ok(())
    }

    async fn get_object(&self, execution_id: &str, container: &str, path: &str) -> PipelineResult<Vec<u8>> {
        let token = self.cancellation.token(execution_id);
        self.retry
            .run("storage.get", Some(&token), || async move {
                self.storage.get(container, path).await.map_err(PipelineError::from)
            })
            .await
    }

    async fn remove_temp(&self, execution_id: &str) {
        let path = self.temp_upload_path(execution_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(execution_id, path = %path.display(), "临时文件已删除"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(execution_id, error = %e, "临时文件删除失败"),
        }
    }
}

fn upload_state_for(err: &PipelineError) -> UploadState {
    if matches!(err, PipelineError::Cancelled { .. }) {
        UploadState::Cancelled
    } else {
        UploadState::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::ManualDecision;
    use crate::repository::memory_store::MemoryExecutionStore;
    use crate::repository::sqlite_loader::SqliteLoaderBackend;
    use crate::repository::storage::InMemoryStorageBackend;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    const JOURNAL_CSV: &str = "Asiento;Fecha;Cuenta;Debe;Haber\n\
        JE-1;15/12/2024;4300001;100,00;0\n\
        JE-1;15/12/2024;7000001;0;100,00\n";

    const TRIAL_BALANCE_CSV: &str = "Cuenta;Cta Grupo;Cta Subgrupo;Descripcion;Saldo Final\n\
        4300001;4;43;Clientes;100,00\n\
        7000001;7;70;Ventas;-100,00\n";

    struct Harness {
        coordinator: PipelineCoordinator,
        storage: Arc<InMemoryStorageBackend>,
        _dir: TempDir,
    }

    fn harness(configure: impl FnOnce(&mut PipelineSettings)) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut settings = PipelineSettings {
            temp_dir: dir.path().join("tmp"),
            retry_base_delay: Duration::from_millis(1),
            ..PipelineSettings::default()
        };
        configure(&mut settings);

        let storage = Arc::new(InMemoryStorageBackend::new());
        let loader = SqliteLoaderBackend::in_memory(storage.clone(), &settings.containers.results)
            .unwrap();
        let coordinator = PipelineCoordinator::new(
            Arc::new(MemoryExecutionStore::new()),
            storage.clone(),
            Arc::new(loader),
            Arc::new(FieldCatalogs::builtin()),
            Arc::new(settings),
        );
        Harness {
            coordinator,
            storage,
            _dir: dir,
        }
    }

    fn request(name: &str, parent: Option<&str>) -> UploadRequest {
        UploadRequest {
            original_file_name: name.to_string(),
            test_type: "libro_diario_import".to_string(),
            project_id: "p1".to_string(),
            period: Some("2024-12".to_string()),
            parent_execution_id: parent.map(str::to_string),
            principal: Some(PrincipalContext {
                auth_user_id: "u1".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn upload(h: &Harness, name: &str, body: &str, parent: Option<&str>) -> Execution {
        let receipt = h
            .coordinator
            .upload(request(name, parent), body.as_bytes().to_vec())
            .await
            .unwrap();
        h.coordinator.wait_for_upload(&receipt.execution_id).await.unwrap()
    }

    #[test]
    fn test_object_paths() {
        let exec = Execution {
            id: "e1".into(),
            project_id: "p1".into(),
            ..Default::default()
        };
        assert_eq!(
            raw_object_path(&exec, "C:\\datos\\diario 2024.xlsx"),
            "p1/e1/Je/e1_diario 2024_Je.xlsx"
        );
        assert_eq!(mapped_object_path(&exec, STAGE_AUTO), "p1/e1/Je/auto/e1_auto.csv");
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_extension() {
        let h = harness(|_| {});
        let err = h
            .coordinator
            .upload(request("diario.pdf", None), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_upload_then_auto_map() {
        let h = harness(|_| {});
        let exec = upload(&h, "diario.csv", JOURNAL_CSV, None).await;

        assert_eq!(exec.status, ExecutionStatus::Mapped);
        assert_eq!(exec.file_name.as_deref(), Some(format!("{}_diario_Je.csv", exec.id).as_str()));
        let raw = exec.file_path.clone().unwrap();
        assert!(h.storage.exists("uploads", &raw).await.unwrap());
        let mapped = exec.auto_mapeo_output_file.clone().unwrap();
        assert!(h.storage.exists("mapeos", &mapped).await.unwrap());
        assert_eq!(exec.mapeo_stats.as_ref().unwrap().total_rows, 2);

        let progress = h.coordinator.upload_progress(&exec.id).await.unwrap();
        assert_eq!(progress.status, UploadState::Completed);
    }

    #[tokio::test]
    async fn test_single_file_mode_publishes_and_loads() {
        let h = harness(|s| s.require_trial_balance = false);
        let exec = upload(&h, "diario.csv", JOURNAL_CSV, None).await;

        let report = h.coordinator.validate(&exec.id, None).await.unwrap();
        assert!(report.all_passed());

        let exec = h.coordinator.execution_info(&exec.id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        let paths = exec.published_paths.clone().unwrap();
        assert!(paths.journal_header.is_some());
        assert!(exec.loader_result.as_ref().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_pair_waits_for_trial_balance() {
        let h = harness(|_| {});
        let parent = upload(&h, "diario.csv", JOURNAL_CSV, None).await;
        h.coordinator.validate(&parent.id, None).await.unwrap();
        assert_eq!(
            h.coordinator.execution_info(&parent.id).await.unwrap().status,
            ExecutionStatus::Validated
        );

        let child = upload(&h, "sumas.csv", TRIAL_BALANCE_CSV, Some(&parent.id)).await;
        assert_eq!(child.id, child_execution_id(&parent.id));
        assert_eq!(child.status, ExecutionStatus::Mapped);

        let report = h.coordinator.run_trial_balance_validations(&child.id).await.unwrap();
        assert!(report.all_passed());

        let pair = h.coordinator.coordinated(&parent.id).await.unwrap();
        for member in pair.members() {
            assert_eq!(member.status, ExecutionStatus::Completed);
            assert!(member.loader_result.is_some());
        }
    }

    #[tokio::test]
    async fn test_paired_publish_requires_publish_ready() {
        let h = harness(|_| {});
        let parent = upload(&h, "diario.csv", JOURNAL_CSV, None).await;
        h.coordinator.validate(&parent.id, None).await.unwrap();

        let err = h.coordinator.publish_results(&parent.id, None).await.unwrap_err();
        match err {
            PipelineError::InvalidState { execution_id, status, .. } => {
                assert_eq!(execution_id, parent.id);
                assert_eq!(status, ExecutionStatus::Validated);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let exec = h.coordinator.execution_info(&parent.id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Validated);
        assert!(exec.published_paths.is_none());
    }

    #[tokio::test]
    async fn test_terminal_executions_release_runtime_entries() {
        let h = harness(|s| s.require_trial_balance = false);
        let exec = upload(&h, "diario.csv", JOURNAL_CSV, None).await;
        h.coordinator.validate(&exec.id, None).await.unwrap();
        assert_eq!(
            h.coordinator.execution_info(&exec.id).await.unwrap().status,
            ExecutionStatus::Completed
        );

        assert!(h.coordinator.locks.is_empty());
        assert!(h.coordinator.cancellation.is_empty());
        assert!(h.coordinator.uploads.is_empty());
        // 终态后仍可按执行状态查询进度
        let progress = h.coordinator.upload_progress(&exec.id).await.unwrap();
        assert_eq!(progress.status, UploadState::Completed);
    }

    #[tokio::test]
    async fn test_manual_mapping_completes_missing_fields() {
        let h = harness(|_| {});
        let body = "Asiento;Fecha;Cuenta;Importe;Xyz\nJE-1;2024-12-15;430;100;a\nJE-1;2024-12-15;700;-100;b\n";
        let exec = upload(&h, "diario.csv", body, None).await;
        assert_eq!(exec.status, ExecutionStatus::MappingRequired);

        let mut decisions: UserDecisions = BTreeMap::new();
        decisions.insert(
            "Xyz".to_string(),
            ManualDecision {
                field_type: "ignore".to_string(),
                confidence: None,
                note: None,
            },
        );
        let outcome = h
            .coordinator
            .apply_manual_mapping(&exec.id, &decisions, ManualMappingOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.csv_path, mapped_object_path(&exec, STAGE_MANUAL));

        let exec = h.coordinator.execution_info(&exec.id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Mapped);
        assert_eq!(exec.mapped_csv_path(), Some(outcome.csv_path.as_str()));
    }

    #[tokio::test]
    async fn test_unknown_decision_column_keeps_status() {
        let h = harness(|_| {});
        let body = "Asiento;Fecha;Cuenta;Importe;Xyz\nJE-1;2024-12-15;430;100;a\n";
        let exec = upload(&h, "diario.csv", body, None).await;

        let mut decisions: UserDecisions = BTreeMap::new();
        decisions.insert(
            "NoExiste".to_string(),
            ManualDecision {
                field_type: "amount".to_string(),
                confidence: None,
                note: None,
            },
        );
        let err = h
            .coordinator
            .apply_manual_mapping(&exec.id, &decisions, ManualMappingOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_recoverable());

        let exec = h.coordinator.execution_info(&exec.id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::MappingRequired);
        assert!(exec.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_validation_is_not_published() {
        let h = harness(|s| s.require_trial_balance = false);
        let body = "Asiento;Fecha;Cuenta;Debe;Haber\nJE-1;15/12/2024;430;100,00;0\nJE-1;15/12/2024;700;0;90,00\n";
        let exec = upload(&h, "diario.csv", body, None).await;

        let report = h.coordinator.validate(&exec.id, None).await.unwrap();
        assert!(!report.all_passed());

        let outcome = h.coordinator.publish_results(&exec.id, None).await.unwrap();
        assert!(outcome.paths.is_empty());
        assert_eq!(outcome.refused.len(), 1);

        let exec = h.coordinator.execution_info(&exec.id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.unwrap().kind, ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_cancel_marks_failed() {
        let h = harness(|_| {});
        let exec = upload(&h, "diario.csv", JOURNAL_CSV, None).await;

        let cancelled = h.coordinator.cancel(&exec.id, None).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Failed);
        assert_eq!(cancelled.error.unwrap().kind, ErrorKind::Cancelled);

        let err = h.coordinator.validate(&exec.id, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState { .. }));
        assert!(!h.coordinator.cancellation.is_cancelled(&exec.id));
        assert!(h.coordinator.uploads.get(&exec.id).is_none());
        assert!(h.coordinator.locks.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_artifacts() {
        let h = harness(|_| {});
        let exec = upload(&h, "diario.csv", JOURNAL_CSV, None).await;
        let raw = exec.file_path.clone().unwrap();

        assert!(h.coordinator.delete(&exec.id).await.unwrap());
        assert!(!h.storage.exists("uploads", &raw).await.unwrap());
        assert!(matches!(
            h.coordinator.execution_info(&exec.id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(!h.coordinator.delete(&exec.id).await.unwrap());
    }
}
