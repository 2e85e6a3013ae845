//! 同步会话：贯穿一次逻辑调用及其所有重试的可变状态

use crate::core::checkpoint::CheckpointStore;
use crate::core::planner::{DeleteTask, DownloadPlan, DownloadTask, TransferPlan, UploadTask};
use crate::storage::{DeleteResult, PutResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// 会话所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Planning,
    Uploading,
    Deleting,
    Downloading,
    Retrying,
    Done,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Planning => write!(f, "planning"),
            SyncState::Uploading => write!(f, "uploading"),
            SyncState::Deleting => write!(f, "deleting"),
            SyncState::Downloading => write!(f, "downloading"),
            SyncState::Retrying => write!(f, "retrying"),
            SyncState::Done => write!(f, "done"),
        }
    }
}

/// 已完成结果集（按 key 去重）
///
/// 重试重放同一批任务时，已完成的 key 直接跳过、不再发起网络请求，
/// 最终结果也不会重复计数。并发任务共享写入，内部加锁。
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    inner: Arc<Mutex<ResultsInner>>,
}

#[derive(Debug, Default)]
struct ResultsInner {
    puts: HashMap<String, PutResult>,
    deletes: HashMap<String, DeleteResult>,
    gets: HashMap<String, PathBuf>,
}

impl ResultSet {
    pub fn contains_put(&self, key: &str) -> bool {
        self.inner.lock().expect("results lock").puts.contains_key(key)
    }

    pub fn record_put(&self, result: PutResult) {
        let mut inner = self.inner.lock().expect("results lock");
        inner.puts.insert(result.key.clone(), result);
    }

    pub fn contains_delete(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("results lock")
            .deletes
            .contains_key(key)
    }

    pub fn record_delete(&self, result: DeleteResult) {
        let mut inner = self.inner.lock().expect("results lock");
        inner.deletes.insert(result.key.clone(), result);
    }

    pub fn contains_get(&self, key: &str) -> bool {
        self.inner.lock().expect("results lock").gets.contains_key(key)
    }

    pub fn record_get(&self, key: &str, path: PathBuf) {
        let mut inner = self.inner.lock().expect("results lock");
        inner.gets.insert(key.to_string(), path);
    }

    /// 去重后的上传结果，按 key 排序
    pub fn puts_sorted(&self) -> Vec<PutResult> {
        let inner = self.inner.lock().expect("results lock");
        let mut v: Vec<_> = inner.puts.values().cloned().collect();
        v.sort_by(|a, b| a.key.cmp(&b.key));
        v
    }

    /// 去重后的删除结果，按 key 排序
    pub fn deletes_sorted(&self) -> Vec<DeleteResult> {
        let inner = self.inner.lock().expect("results lock");
        let mut v: Vec<_> = inner.deletes.values().cloned().collect();
        v.sort_by(|a, b| a.key.cmp(&b.key));
        v
    }

    /// 去重后的下载 key 列表，按 key 排序
    pub fn gets_sorted(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("results lock");
        let mut v: Vec<_> = inner.gets.keys().cloned().collect();
        v.sort();
        v
    }
}

/// syncUp 的最终结果
#[derive(Debug, Clone, Default)]
pub struct SyncUpOutcome {
    pub put: Vec<PutResult>,
    pub delete: Vec<DeleteResult>,
}

/// syncDown 的最终结果
#[derive(Debug, Clone, Default)]
pub struct SyncDownOutcome {
    pub get: Vec<String>,
    pub delete: Vec<PathBuf>,
}

/// 同步会话
///
/// 首次尝试时创建，引用传入每次重试，到达终止状态后销毁。
/// 待传输映射、断点和已完成结果由并发任务共享写入。
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub id: String,
    /// 尝试次数（含首次），单调不减
    pub attempts: u32,
    pub state: SyncState,
    pending_uploads: Arc<Mutex<HashMap<String, UploadTask>>>,
    pending_deletes: Arc<Mutex<HashMap<String, DeleteTask>>>,
    pending_downloads: Arc<Mutex<HashMap<String, DownloadTask>>>,
    /// 远端已不存在、待删除的本地文件
    pub local_deletes: Vec<PathBuf>,
    pub checkpoints: CheckpointStore,
    pub results: ResultSet,
}

impl SyncSession {
    fn empty() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempts: 1,
            state: SyncState::Planning,
            pending_uploads: Arc::new(Mutex::new(HashMap::new())),
            pending_deletes: Arc::new(Mutex::new(HashMap::new())),
            pending_downloads: Arc::new(Mutex::new(HashMap::new())),
            local_deletes: Vec::new(),
            checkpoints: CheckpointStore::new(),
            results: ResultSet::default(),
        }
    }

    /// 以上传计划创建会话
    pub fn for_upload(plan: TransferPlan) -> Self {
        let session = Self::empty();
        {
            let mut uploads = session.pending_uploads.lock().expect("session lock");
            for task in plan.uploads {
                uploads.insert(task.key.clone(), task);
            }
            let mut deletes = session.pending_deletes.lock().expect("session lock");
            for task in plan.deletes {
                deletes.insert(task.key.clone(), task);
            }
        }
        session
    }

    /// 以下载计划创建会话
    pub fn for_download(plan: DownloadPlan) -> Self {
        let mut session = Self::empty();
        {
            let mut downloads = session.pending_downloads.lock().expect("session lock");
            for task in plan.downloads {
                downloads.insert(task.key.clone(), task);
            }
        }
        session.local_deletes = plan.local_deletes;
        session
    }

    /// 本次尝试要执行的上传任务（排除已完成的 key）
    pub fn upload_batch(&self) -> Vec<UploadTask> {
        let uploads = self.pending_uploads.lock().expect("session lock");
        uploads
            .values()
            .filter(|t| !self.results.contains_put(&t.key))
            .cloned()
            .collect()
    }

    pub fn delete_batch(&self) -> Vec<DeleteTask> {
        let deletes = self.pending_deletes.lock().expect("session lock");
        deletes
            .values()
            .filter(|t| !self.results.contains_delete(&t.key))
            .cloned()
            .collect()
    }

    pub fn download_batch(&self) -> Vec<DownloadTask> {
        let downloads = self.pending_downloads.lock().expect("session lock");
        downloads
            .values()
            .filter(|t| !self.results.contains_get(&t.key))
            .cloned()
            .collect()
    }

    /// 任务完成后从待上传集合移除（断点同时清除，维持两者的一致性）
    pub fn finish_upload(&self, key: &str) {
        self.pending_uploads.lock().expect("session lock").remove(key);
        self.checkpoints.remove(key);
    }

    pub fn finish_delete(&self, key: &str) {
        self.pending_deletes.lock().expect("session lock").remove(key);
    }

    pub fn finish_download(&self, key: &str) {
        self.pending_downloads
            .lock()
            .expect("session lock")
            .remove(key);
    }

    pub fn upload_outcome(&self) -> SyncUpOutcome {
        SyncUpOutcome {
            put: self.results.puts_sorted(),
            delete: self.results.deletes_sorted(),
        }
    }

    pub fn download_outcome(&self, deleted: Vec<PathBuf>) -> SyncDownOutcome {
        SyncDownOutcome {
            get: self.results.gets_sorted(),
            delete: deleted,
        }
    }
}
