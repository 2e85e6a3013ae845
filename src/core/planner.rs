//! 差异计算：本地与远端映射的纯函数对比

use crate::core::enumerator::LocalFile;
use crate::storage::RemoteFile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 上传任务
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
}

/// 删除任务
#[derive(Debug, Clone)]
pub struct DeleteTask {
    pub key: String,
}

/// 下载任务
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
}

/// syncUp 的传输计划
///
/// 只在会话的首次尝试计算一次；重试沿用原计划减去已完成项，
/// 不再对可能正在变化的远端重新求差。
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub uploads: Vec<UploadTask>,
    pub deletes: Vec<DeleteTask>,
}

/// syncDown 的传输计划
#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    pub downloads: Vec<DownloadTask>,
    /// 远端已不存在、待删除的本地文件
    pub local_deletes: Vec<PathBuf>,
}

/// 差异计算器
#[derive(Debug, Clone)]
pub struct DiffPlanner {
    /// 时间容差（秒），吸收本地与存储端的时钟偏差
    pub skew_tolerance_secs: i64,
}

impl DiffPlanner {
    pub fn new(skew_tolerance_secs: i64) -> Self {
        Self {
            skew_tolerance_secs,
        }
    }

    /// 本地文件是否需要上传覆盖远端
    fn needs_upload(&self, local: &LocalFile, remote: &RemoteFile) -> bool {
        local.modified > remote.last_modified + self.skew_tolerance_secs
    }

    /// 远端对象是否需要下载覆盖本地
    fn needs_download(&self, remote: &RemoteFile, local: &LocalFile) -> bool {
        remote.last_modified > local.modified + self.skew_tolerance_secs
    }

    /// 计算上传方向的差异
    ///
    /// 上传集与删除集的 key 必然不相交：前者取自本地映射，
    /// 后者只含本地不存在的远端 key。
    pub fn plan_upload(
        &self,
        local: &HashMap<String, LocalFile>,
        remote: &HashMap<String, RemoteFile>,
        delete_removed: bool,
    ) -> TransferPlan {
        let mut uploads = Vec::new();
        for (key, file) in local {
            match remote.get(key) {
                None => uploads.push(UploadTask {
                    key: key.clone(),
                    path: file.path.clone(),
                    size: file.size,
                }),
                Some(r) if self.needs_upload(file, r) => {
                    debug!(
                        "文件需要更新: {} (local={}, remote={})",
                        key, file.modified, r.last_modified
                    );
                    uploads.push(UploadTask {
                        key: key.clone(),
                        path: file.path.clone(),
                        size: file.size,
                    });
                }
                Some(_) => {}
            }
        }

        let mut deletes = Vec::new();
        if delete_removed {
            for key in remote.keys() {
                if !local.contains_key(key) {
                    deletes.push(DeleteTask { key: key.clone() });
                }
            }
        }

        // 按 key 排序，确保一致性
        uploads.sort_by(|a, b| a.key.cmp(&b.key));
        deletes.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(
            "差异计算完成: {} 个上传, {} 个删除",
            uploads.len(),
            deletes.len()
        );

        TransferPlan { uploads, deletes }
    }

    /// 计算下载方向的差异（镜像）
    ///
    /// key_prefix 用于把远端 key 还原为本地相对路径。
    pub fn plan_download(
        &self,
        remote: &HashMap<String, RemoteFile>,
        local: &HashMap<String, LocalFile>,
        local_dir: &Path,
        key_prefix: &str,
        delete_removed: bool,
    ) -> DownloadPlan {
        let prefix = key_prefix.trim_matches('/');

        let mut downloads = Vec::new();
        for (key, r) in remote {
            let wanted = match local.get(key) {
                None => true,
                Some(l) => self.needs_download(r, l),
            };
            if !wanted {
                continue;
            }

            let rel = key
                .strip_prefix(prefix)
                .map(|s| s.trim_start_matches('/'))
                .unwrap_or(key.as_str());
            if rel.is_empty() {
                continue;
            }
            downloads.push(DownloadTask {
                key: key.clone(),
                path: local_dir.join(rel),
                size: r.size.unwrap_or(0),
            });
        }

        let mut local_deletes = Vec::new();
        if delete_removed {
            for (key, file) in local {
                if !remote.contains_key(key) {
                    local_deletes.push(file.path.clone());
                }
            }
        }

        downloads.sort_by(|a, b| a.key.cmp(&b.key));
        local_deletes.sort();

        DownloadPlan {
            downloads,
            local_deletes,
        }
    }
}
