//! 同步引擎的错误类型

use std::path::PathBuf;

use crate::storage::StoreError;

/// 同步调用的终止错误
///
/// 中间的瞬时失败在引擎内部重试，调用方只会看到这里的终止错误之一。
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 参数无效（空前缀、以 / 开头的前缀、并发数为 0 等），不重试
    #[error("参数无效: {0}")]
    Validation(String),

    /// 本地根目录不存在，不重试
    #[error("本地目录不存在: {0}")]
    NotFound(PathBuf),

    /// 瞬时错误重试次数已达上限
    #[error("重试次数已达上限 ({0})")]
    RetryLimitExceeded(u32),

    /// 存储端的非瞬时错误，原样向上传递
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 本地文件系统错误（下载写入、镜像删除等）
    #[error("本地 IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// 是否属于不应重试的参数/环境类错误
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_) | SyncError::NotFound(_) | SyncError::RetryLimitExceeded(_)
        )
    }
}
