//! 同步引擎：编排差异计算、传输执行与重试

use crate::config::{SyncConfig, SyncDownOptions, SyncUpOptions};
use crate::core::enumerator::{enumerate_local, IgnoreRules};
use crate::core::executor::{TaskFailure, TransferExecutor};
use crate::core::planner::DiffPlanner;
use crate::core::session::{SyncDownOutcome, SyncSession, SyncState, SyncUpOutcome};
use crate::error::SyncError;
use crate::storage::{
    Headers, MetaField, ObjectStore, RemoteFile, DELETE_BATCH_SIZE, MAX_KEYS_PER_PAGE,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 上传方向状态机的当前阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uploading,
    Deleting,
}

/// 同步引擎
///
/// 状态机：INIT -> PLANNING -> UPLOADING -> DELETING -> DONE，
/// 瞬时错误经 RETRYING 回到先前阶段，会话状态（待传输映射、断点、
/// 已完成结果、尝试计数）整体带入下一次尝试。
/// 计划只在首次尝试计算一次，重试不对可能正在变化的远端重新求差。
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    executor: TransferExecutor,
    running: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    pub fn with_config(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Self {
        let executor = TransferExecutor::new(store.clone(), config.clone());
        Self {
            store,
            config,
            executor,
            running: AtomicBool::new(false),
        }
    }

    /// 是否有同步调用正在进行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 校验并规范化前缀：去掉末尾 /，拒绝空值和以 / 开头的值
    fn validate_prefix(prefix: &str) -> Result<String, SyncError> {
        let trimmed = prefix.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Validation("前缀不能为空".to_string()));
        }
        if trimmed.starts_with('/') {
            return Err(SyncError::Validation(format!(
                "前缀不能以 / 开头: {}",
                prefix
            )));
        }
        Ok(trimmed.trim_end_matches('/').to_string())
    }

    fn validate_config(&self) -> Result<(), SyncError> {
        if self.config.concurrency == 0 {
            return Err(SyncError::Validation("并发数不能为 0".to_string()));
        }
        Ok(())
    }

    /// 分页列举拍平为完整对象列表；前缀不存在返回空列表而非错误
    async fn collect_remote(
        &self,
        prefix: &str,
        projection: Option<&[MetaField]>,
    ) -> Result<Vec<RemoteFile>, SyncError> {
        let list_prefix = format!("{}/", prefix);
        let mut all = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .store
                .list_page(
                    &list_prefix,
                    MAX_KEYS_PER_PAGE,
                    marker.as_deref(),
                    projection,
                )
                .await
                .map_err(SyncError::Store)?;
            all.extend(page.objects);
            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        debug!("列举完成: {} 共 {} 个对象", prefix, all.len());
        Ok(all)
    }

    /// 列举前缀下的全部对象
    ///
    /// projection 限定需要取回的元数据字段，None 表示全部。
    pub async fn list_all(
        &self,
        prefix: &str,
        projection: Option<&[MetaField]>,
    ) -> Result<Vec<RemoteFile>, SyncError> {
        let prefix = Self::validate_prefix(prefix)?;
        self.collect_remote(&prefix, projection).await
    }

    /// 把本地目录同步到远端前缀
    ///
    /// 返回去重后的上传与删除结果；瞬时失败在内部按固定间隔重试，
    /// 调用方只会看到一个最终结果或一个终止错误。
    pub async fn sync_up(
        &self,
        local_dir: &Path,
        prefix: &str,
        opts: &SyncUpOptions,
    ) -> Result<SyncUpOutcome, SyncError> {
        // INIT: 参数校验，失败不重试
        let prefix = Self::validate_prefix(prefix)?;
        self.validate_config()?;

        self.running.store(true, Ordering::SeqCst);
        scopeguard::defer! {
            self.running.store(false, Ordering::SeqCst);
        }

        info!(
            "开始同步: {} -> {}:{}/",
            local_dir.display(),
            self.store.name(),
            prefix
        );

        // PLANNING: 枚举本地与远端，计算差异（仅首次尝试）
        let ignore = IgnoreRules::new(&opts.ignore);
        let local = enumerate_local(local_dir, &prefix, &ignore).await?;
        let mut remote = self
            .remote_map(&prefix, Some(&[MetaField::Size, MetaField::LastModified]))
            .await?;
        // 命中忽略规则的远端对象同样视为不存在，避免仅因本地被忽略而触发删除
        if !ignore.is_empty() {
            let rel_prefix = format!("{}/", prefix);
            remote.retain(|key, _| {
                let rel = key.strip_prefix(&rel_prefix).unwrap_or(key);
                !ignore.matches(rel)
            });
        }

        let planner = DiffPlanner::new(self.config.skew_tolerance_secs);
        let plan = planner.plan_upload(&local, &remote, opts.delete_removed);
        info!(
            "计划完成: {} 个上传, {} 个删除",
            plan.uploads.len(),
            plan.deletes.len()
        );

        let pending_keys: HashSet<String> = plan.uploads.iter().map(|t| t.key.clone()).collect();
        let mut session = SyncSession::for_upload(plan);

        // 尝试恢复上次落盘的断点，只保留仍在待上传集合中的条目
        let checkpoint_file = self.checkpoint_file(&prefix);
        if let Some(ref file) = checkpoint_file {
            session.checkpoints.load_from_file(file);
            session.checkpoints.retain_keys(&pending_keys);
        }

        // UPLOADING -> DELETING -> DONE，瞬时错误经 RETRYING 回到当前阶段
        let mut phase = Phase::Uploading;
        loop {
            session.state = match phase {
                Phase::Uploading => SyncState::Uploading,
                Phase::Deleting => SyncState::Deleting,
            };

            let result = match phase {
                Phase::Uploading => self.executor.run_uploads(&session, opts).await,
                Phase::Deleting => self.executor.run_deletes(&session).await,
            };

            match result {
                Ok(()) => match phase {
                    Phase::Uploading if opts.delete_removed => phase = Phase::Deleting,
                    _ => break,
                },
                Err(failure) => {
                    self.enter_retry(&mut session, failure, checkpoint_file.as_deref())
                        .await?
                }
            }
        }

        session.state = SyncState::Done;
        if let Some(ref file) = checkpoint_file {
            let _ = std::fs::remove_file(file);
        }

        let outcome = session.upload_outcome();
        info!(
            "同步完成: {} (上传 {}, 删除 {}, 尝试 {} 次)",
            session.id,
            outcome.put.len(),
            outcome.delete.len(),
            session.attempts
        );
        Ok(outcome)
    }

    /// 把远端前缀同步到本地目录（反向同步）
    ///
    /// 下载为单次传输，不支持断点；本地目录缺失视为空树，下载时创建。
    pub async fn sync_down(
        &self,
        prefix: &str,
        local_dir: &Path,
        opts: &SyncDownOptions,
    ) -> Result<SyncDownOutcome, SyncError> {
        let prefix = Self::validate_prefix(prefix)?;
        self.validate_config()?;

        self.running.store(true, Ordering::SeqCst);
        scopeguard::defer! {
            self.running.store(false, Ordering::SeqCst);
        }

        info!(
            "开始反向同步: {}:{}/ -> {}",
            self.store.name(),
            prefix,
            local_dir.display()
        );

        let remote = self
            .remote_map(&prefix, Some(&[MetaField::Size, MetaField::LastModified]))
            .await?;
        let local = if local_dir.exists() {
            enumerate_local(local_dir, &prefix, &IgnoreRules::default()).await?
        } else {
            HashMap::new()
        };

        let planner = DiffPlanner::new(self.config.skew_tolerance_secs);
        let plan = planner.plan_download(&remote, &local, local_dir, &prefix, opts.delete_removed);
        info!(
            "计划完成: {} 个下载, {} 个本地删除",
            plan.downloads.len(),
            plan.local_deletes.len()
        );

        let mut session = SyncSession::for_download(plan);

        loop {
            session.state = SyncState::Downloading;
            match self.executor.run_downloads(&session, opts.verbose).await {
                Ok(()) => break,
                Err(failure) => self.enter_retry(&mut session, failure, None).await?,
            }
        }

        // 镜像删除本地多余文件
        let mut deleted = Vec::new();
        for path in std::mem::take(&mut session.local_deletes) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("删除本地文件: {}", path.display());
                    deleted.push(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::Io(e)),
            }
        }

        session.state = SyncState::Done;
        let outcome = session.download_outcome(deleted);
        info!(
            "反向同步完成: {} (下载 {}, 删除 {}, 尝试 {} 次)",
            session.id,
            outcome.get.len(),
            outcome.delete.len(),
            session.attempts
        );
        Ok(outcome)
    }

    /// 删除前缀下的全部对象
    ///
    /// 按固定批次调用批量删除；瞬时失败时整个操作从列举重新开始，
    /// 不做批次内断点，受重试上限约束。返回去重后的已删除 key。
    pub async fn remove_all(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let prefix = Self::validate_prefix(prefix)?;

        let mut deleted: BTreeSet<String> = BTreeSet::new();
        let mut attempts = 1u32;

        loop {
            match self.try_remove_all(&prefix, &mut deleted).await {
                Ok(()) => {
                    info!("前缀删除完成: {} ({} 个对象)", prefix, deleted.len());
                    return Ok(deleted.into_iter().collect());
                }
                Err(e) if e.is_transient() => {
                    if attempts >= self.config.retry_limit {
                        return Err(SyncError::RetryLimitExceeded(self.config.retry_limit));
                    }
                    attempts += 1;
                    warn!(
                        "前缀删除瞬时失败，{:?} 后从列举重新开始 ({}/{}): {}",
                        self.config.retry_delay, attempts, self.config.retry_limit, e
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(SyncError::Store(e)),
            }
        }
    }

    async fn try_remove_all(
        &self,
        prefix: &str,
        deleted: &mut BTreeSet<String>,
    ) -> Result<(), crate::storage::StoreError> {
        let list_prefix = format!("{}/", prefix);
        let mut marker: Option<String> = None;
        let mut keys = Vec::new();

        loop {
            let page = self
                .store
                .list_page(&list_prefix, MAX_KEYS_PER_PAGE, marker.as_deref(), Some(&[]))
                .await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let confirmed = self.store.delete_multi(batch).await?;
            deleted.extend(confirmed);
        }
        Ok(())
    }

    /// 设置对象的下载文件名（Content-Disposition）
    ///
    /// 非 ASCII 文件名按百分号编码写入。
    pub async fn set_download_name(&self, key: &str, filename: &str) -> Result<(), SyncError> {
        if key.trim().is_empty() {
            return Err(SyncError::Validation("对象 key 不能为空".to_string()));
        }
        let mut headers = Headers::new();
        headers.insert(
            "Content-Disposition".to_string(),
            format!("attachment; filename=\"{}\"", urlencoding::encode(filename)),
        );
        self.store
            .set_metadata(key, &headers)
            .await
            .map_err(SyncError::Store)
    }

    /// 断点落盘文件路径（按前缀命名），未配置落盘目录时为 None
    fn checkpoint_file(&self, prefix: &str) -> Option<PathBuf> {
        self.config
            .checkpoint_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.checkpoints.json", prefix.replace('/', "_"))))
    }

    async fn remote_map(
        &self,
        prefix: &str,
        projection: Option<&[MetaField]>,
    ) -> Result<HashMap<String, RemoteFile>, SyncError> {
        let list = self.collect_remote(prefix, projection).await?;
        Ok(list.into_iter().map(|r| (r.key.clone(), r)).collect())
    }

    /// RETRYING：判定是否还能重试，等待固定间隔后回到先前阶段
    ///
    /// 过期的分片会话先清除对应 key 的断点，使该对象重新开始分片序列。
    /// 尝试计数含首次执行，达到上限即终止。
    async fn enter_retry(
        &self,
        session: &mut SyncSession,
        failure: TaskFailure,
        checkpoint_file: Option<&Path>,
    ) -> Result<(), SyncError> {
        if !failure.error.is_transient() {
            return Err(SyncError::Store(failure.error));
        }

        if failure.error.is_expired_upload() {
            warn!("分片会话已过期，重新开始该对象的上传: {}", failure.key);
            session.checkpoints.remove(&failure.key);
        }

        session.state = SyncState::Retrying;
        if session.attempts >= self.config.retry_limit {
            return Err(SyncError::RetryLimitExceeded(self.config.retry_limit));
        }
        session.attempts += 1;

        warn!(
            "瞬时错误，{:?} 后重试 ({}/{}): {} - {}",
            self.config.retry_delay,
            session.attempts,
            self.config.retry_limit,
            failure.key,
            failure.error
        );

        if let Some(file) = checkpoint_file {
            if let Err(e) = session.checkpoints.save_to_file(file) {
                warn!("断点落盘失败（继续重试）: {}", e);
            }
        }

        tokio::time::sleep(self.config.retry_delay).await;
        Ok(())
    }
}
