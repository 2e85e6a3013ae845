pub mod oss;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use oss::OssStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 单页列举的最大条目数（OSS 上限）
pub const MAX_KEYS_PER_PAGE: usize = 1000;
/// 批量删除单次请求的最大 key 数
pub const DELETE_BATCH_SIZE: usize = 1000;

/// 请求头集合，default 层在下、按 key 的覆盖层在上
pub type Headers = HashMap<String, String>;

/// 列举时需要的元数据字段（用于减少列举开销）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Size,
    LastModified,
    Etag,
}

/// 远端对象记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub key: String,
    /// 最后修改时间（Unix 秒）
    pub last_modified: i64,
    pub size: Option<u64>,
    pub etag: Option<String>,
}

/// 一页列举结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<RemoteFile>,
    /// 继续列举的游标，None 表示已到末尾
    pub next_marker: Option<String>,
}

/// 上传确认
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub key: String,
    pub etag: Option<String>,
}

/// 删除确认，以请求目标的 key 作为去重标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub key: String,
}

/// 分片上传断点
///
/// 对引擎而言是不透明状态：引擎只负责保存、透传和清除，
/// 字段的含义由存储实现解释。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCheckpoint {
    pub upload_id: String,
    pub key: String,
    pub total_size: u64,
    pub part_size: u64,
    /// 已完成的分片编号（从 1 开始）
    pub parts_done: Vec<u32>,
}

impl UploadCheckpoint {
    /// 已传输的字节数（按完成分片估算，末片可能偏大）
    pub fn bytes_done(&self) -> u64 {
        (self.parts_done.len() as u64 * self.part_size).min(self.total_size)
    }
}

/// 每完成一个分片回调一次，携带可恢复的完整断点
pub type PartCallback = Arc<dyn Fn(UploadCheckpoint) + Send + Sync>;

/// 存储端错误
///
/// 瞬时类错误（超时、传输失败、分片会话过期）由引擎按固定间隔重试；
/// 其余错误原样向上传递。分类是封闭的枚举匹配，瞬时判定对所有
/// 子条件统一生效。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("响应超时: {0}")]
    ResponseTimeout(String),

    #[error("连接超时: {0}")]
    ConnectTimeout(String),

    #[error("请求失败: {0}")]
    Request(String),

    #[error("响应异常: {0}")]
    Response(String),

    /// 分片上传会话已过期（如 OSS NoSuchUpload），重试前需丢弃断点
    #[error("分片上传会话已过期: {0}")]
    ExpiredUpload(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// 是否可按固定间隔重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::ResponseTimeout(_)
                | StoreError::ConnectTimeout(_)
                | StoreError::Request(_)
                | StoreError::Response(_)
                | StoreError::ExpiredUpload(_)
        )
    }

    /// 是否是需要先丢弃断点再重试的过期分片会话
    pub fn is_expired_upload(&self) -> bool {
        matches!(self, StoreError::ExpiredUpload(_))
    }
}

/// 远端对象存储抽象接口
///
/// 引擎只通过这组原语访问存储；分页列举、分片上传等细节由实现承担。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列举一页对象，max_keys 不超过 [`MAX_KEYS_PER_PAGE`]
    async fn list_page(
        &self,
        prefix: &str,
        max_keys: usize,
        marker: Option<&str>,
        projection: Option<&[MetaField]>,
    ) -> Result<ListPage, StoreError>;

    /// 单次上传整个文件，受 timeout 约束
    async fn put(
        &self,
        key: &str,
        source: &Path,
        timeout: Duration,
        headers: &Headers,
    ) -> Result<PutResult, StoreError>;

    /// 分片上传；给定断点时从断点恢复，每完成一个分片调用一次 on_part
    async fn multipart_put(
        &self,
        key: &str,
        source: &Path,
        part_size: u64,
        checkpoint: Option<UploadCheckpoint>,
        headers: &Headers,
        on_part: PartCallback,
    ) -> Result<PutResult, StoreError>;

    /// 下载对象到本地路径
    async fn get(&self, key: &str, dest: &Path) -> Result<(), StoreError>;

    /// 删除单个对象；对象不存在不视为错误
    async fn delete(&self, key: &str) -> Result<DeleteResult, StoreError>;

    /// 批量删除，返回确认删除的 key 列表
    async fn delete_multi(&self, keys: &[String]) -> Result<Vec<String>, StoreError>;

    /// 更新对象的元数据头
    async fn set_metadata(&self, key: &str, headers: &Headers) -> Result<(), StoreError>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}
