//! OSS 目录同步引擎
//!
//! 把本地目录与远端对象存储的一个前缀（命名空间）对齐：计算新增和
//! 变化的本地文件并上传，可选删除远端多余的对象；也支持反向镜像
//! （下载远端较新的对象）。大文件走分片上传并在会话内保存断点，
//! 瞬时网络错误按固定间隔重试，会话状态整体带入每次重试，保证向前
//! 推进且同一对象不会被重复执行。
//!
//! 远端存储通过 [`storage::ObjectStore`] 抽象接入，内置基于 opendal
//! 的阿里云 OSS 实现 [`storage::OssStore`]。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{SyncConfig, SyncDownOptions, SyncUpOptions};
pub use crate::core::{SyncDownOutcome, SyncEngine, SyncUpOutcome};
pub use error::SyncError;
pub use storage::{
    MetaField, ObjectStore, OssStore, RemoteFile, StoreError, UploadCheckpoint,
};
