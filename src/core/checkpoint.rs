//! 分片上传断点管理 - 支持断点续传

use crate::storage::UploadCheckpoint;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// 断点存储
///
/// 以目标 key 索引进行中的分片上传断点。每完成一个分片写入一次，
/// 上传成功或显式作废时删除。断点只对仍在待上传集合中的 key 存在。
///
/// 多个并发任务会同时写入，内部用互斥锁保护；锁内不做任何 IO。
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    inner: Arc<Mutex<HashMap<String, UploadCheckpoint>>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出某个 key 的断点副本
    pub fn get(&self, key: &str) -> Option<UploadCheckpoint> {
        self.inner.lock().expect("checkpoint lock").get(key).cloned()
    }

    /// 保存断点（同 key 覆盖）
    pub fn save(&self, checkpoint: UploadCheckpoint) {
        debug!(
            "保存断点: {} ({}/{} 字节)",
            checkpoint.key,
            checkpoint.bytes_done(),
            checkpoint.total_size
        );
        self.inner
            .lock()
            .expect("checkpoint lock")
            .insert(checkpoint.key.clone(), checkpoint);
    }

    /// 删除断点，返回被删除的条目
    pub fn remove(&self, key: &str) -> Option<UploadCheckpoint> {
        self.inner.lock().expect("checkpoint lock").remove(key)
    }

    pub fn clear(&self) {
        self.inner.lock().expect("checkpoint lock").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("checkpoint lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 只保留给定 key 集合内的断点
    ///
    /// 从文件恢复后调用，维持「断点只对待上传的 key 存在」的不变量。
    pub fn retain_keys(&self, keys: &std::collections::HashSet<String>) {
        self.inner
            .lock()
            .expect("checkpoint lock")
            .retain(|k, _| keys.contains(k));
    }

    /// 把当前断点落盘为 JSON 文件
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let snapshot = self.inner.lock().expect("checkpoint lock").clone();
        let data = serde_json::to_vec(&snapshot)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        debug!("已落盘 {} 个断点到 {:?}", snapshot.len(), path);
        Ok(())
    }

    /// 从 JSON 文件恢复断点，文件缺失或损坏时保持为空
    pub fn load_from_file(&self, path: &Path) {
        let Ok(data) = std::fs::read(path) else {
            return;
        };
        match serde_json::from_slice::<HashMap<String, UploadCheckpoint>>(&data) {
            Ok(loaded) => {
                debug!("从 {:?} 恢复 {} 个断点", path, loaded.len());
                let mut map = self.inner.lock().expect("checkpoint lock");
                map.extend(loaded);
            }
            Err(e) => warn!("断点文件损坏，忽略: {:?} - {}", path, e),
        }
    }
}
