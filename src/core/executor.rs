//! 传输执行器：有界并发执行上传、删除与下载批次

use crate::config::{SyncConfig, SyncUpOptions};
use crate::core::planner::{DownloadTask, UploadTask};
use crate::core::session::SyncSession;
use crate::storage::{Headers, ObjectStore, PartCallback, PutResult, StoreError};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};

/// 单个任务的失败，携带失败的 key 与错误
///
/// 部分进度（断点、已完成结果）保留在会话中，不通过错误传递。
#[derive(Debug)]
pub struct TaskFailure {
    pub key: String,
    pub error: StoreError,
}

/// 传输执行器
///
/// 一个批次的并发度由信号量约束；批次在首个任务失败或全部任务完成时
/// 判定结束。失败判定后已派发的任务不会被取消，仍在后台运行，其后续
/// 完成会继续记入共享结果集。
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// 执行上传批次
    pub async fn run_uploads(
        &self,
        session: &SyncSession,
        opts: &SyncUpOptions,
    ) -> Result<(), TaskFailure> {
        let mut tasks = session.upload_batch();
        if tasks.is_empty() {
            return Ok(());
        }
        // 小文件优先派发，尽快腾出并发槽位，大文件在后台持续传输
        tasks.sort_by_key(|t| t.size);

        debug!("上传批次: {} 个任务", tasks.len());

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let total = tasks.len();

        for task in tasks {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let config = self.config.clone();
            let session = session.clone();
            let headers = opts.headers_for(&task.key);
            let verbose = opts.verbose;
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };

                // 重试重放：已完成的 key 不再发起网络请求
                if session.results.contains_put(&task.key) {
                    let _ = tx.send(Ok(()));
                    return;
                }

                match upload_one(store.as_ref(), &config, &session, &task, &headers, verbose).await
                {
                    Ok(result) => {
                        session.results.record_put(result);
                        session.finish_upload(&task.key);
                        let _ = tx.send(Ok(()));
                    }
                    Err(error) => {
                        let _ = tx.send(Err(TaskFailure {
                            key: task.key.clone(),
                            error,
                        }));
                    }
                }
            });
        }
        drop(tx);

        let mut finished = 0usize;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(()) => {
                    finished += 1;
                    if finished == total {
                        return Ok(());
                    }
                }
                // 首个失败即判定批次失败，兄弟任务继续在后台运行
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }

    /// 执行删除批次
    pub async fn run_deletes(&self, session: &SyncSession) -> Result<(), TaskFailure> {
        let mut tasks = session.delete_batch();
        if tasks.is_empty() {
            return Ok(());
        }
        tasks.sort_by(|a, b| a.key.cmp(&b.key));

        debug!("删除批次: {} 个任务", tasks.len());

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let total = tasks.len();

        for task in tasks {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let session = session.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };

                if session.results.contains_delete(&task.key) {
                    let _ = tx.send(Ok(()));
                    return;
                }

                match store.delete(&task.key).await {
                    Ok(result) => {
                        session.results.record_delete(result);
                        // 成功即从待删除集合移除，重试不会重复下发
                        session.finish_delete(&task.key);
                        let _ = tx.send(Ok(()));
                    }
                    Err(error) => {
                        let _ = tx.send(Err(TaskFailure {
                            key: task.key.clone(),
                            error,
                        }));
                    }
                }
            });
        }
        drop(tx);

        let mut finished = 0usize;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(()) => {
                    finished += 1;
                    if finished == total {
                        return Ok(());
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }

    /// 执行下载批次（反向同步；不支持断点）
    pub async fn run_downloads(
        &self,
        session: &SyncSession,
        verbose: bool,
    ) -> Result<(), TaskFailure> {
        let mut tasks = session.download_batch();
        if tasks.is_empty() {
            return Ok(());
        }
        tasks.sort_by_key(|t| t.size);

        debug!("下载批次: {} 个任务", tasks.len());

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let total = tasks.len();

        for task in tasks {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let session = session.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };

                if session.results.contains_get(&task.key) {
                    let _ = tx.send(Ok(()));
                    return;
                }

                match download_one(store.as_ref(), &task, verbose).await {
                    Ok(()) => {
                        session.results.record_get(&task.key, task.path.clone());
                        session.finish_download(&task.key);
                        let _ = tx.send(Ok(()));
                    }
                    Err(error) => {
                        let _ = tx.send(Err(TaskFailure {
                            key: task.key.clone(),
                            error,
                        }));
                    }
                }
            });
        }
        drop(tx);

        let mut finished = 0usize;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(()) => {
                    finished += 1;
                    if finished == total {
                        return Ok(());
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }
}

/// 上传单个文件：达到阈值走分片（带断点），否则单次上传
async fn upload_one(
    store: &dyn ObjectStore,
    config: &SyncConfig,
    session: &SyncSession,
    task: &UploadTask,
    headers: &Headers,
    verbose: bool,
) -> Result<PutResult, StoreError> {
    if task.size >= config.large_file_threshold {
        let checkpoint = session.checkpoints.get(&task.key);
        // 续传沿用断点里的分片大小，新上传按分片数上限计算
        let part_size = checkpoint
            .as_ref()
            .map(|c| c.part_size)
            .unwrap_or_else(|| config.part_size_for(task.size));

        if verbose {
            info!(
                "分片上传: {} ({} 字节, 分片 {} 字节, 续传: {})",
                task.key,
                task.size,
                part_size,
                checkpoint.is_some()
            );
        }

        let checkpoints = session.checkpoints.clone();
        let on_part: PartCallback = Arc::new(move |cp| checkpoints.save(cp));

        store
            .multipart_put(&task.key, &task.path, part_size, checkpoint, headers, on_part)
            .await
    } else {
        if verbose {
            info!("上传: {} ({} 字节)", task.key, task.size);
        }
        store
            .put(&task.key, &task.path, config.request_timeout, headers)
            .await
    }
}

/// 下载单个对象，必要时创建父目录
async fn download_one(
    store: &dyn ObjectStore,
    task: &DownloadTask,
    verbose: bool,
) -> Result<(), StoreError> {
    if verbose {
        info!("下载: {} -> {}", task.key, task.path.display());
    }
    if let Some(parent) = task.path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
    }
    store.get(&task.key, &task.path).await
}
