//! 同步引擎配置

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::Headers;

/// 引擎级配置
///
/// 构造时显式传入，不读取任何环境变量或全局状态。
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数
    pub concurrency: usize,
    /// 大文件阈值（字节），达到此大小的文件走分片上传
    pub large_file_threshold: u64,
    /// 默认分片大小（字节）
    pub default_part_size: u64,
    /// 最小分片大小（字节），OSS 限制
    pub min_part_size: u64,
    /// 单个对象允许的最大分片数，OSS 限制
    pub max_part_count: u64,
    /// 瞬时错误的最大尝试次数（含首次）
    pub retry_limit: u32,
    /// 重试前的固定等待间隔（不做指数增长）
    pub retry_delay: Duration,
    /// 单次上传请求的超时
    pub request_timeout: Duration,
    /// 时间容差（秒），吸收本地与存储端的时钟偏差
    pub skew_tolerance_secs: i64,
    /// 断点落盘目录，None 表示断点只保留在内存
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 4, // 默认并行数为4
            large_file_threshold: 10 * 1024 * 1024, // 10MB
            default_part_size: 5 * 1024 * 1024,     // 5MB
            min_part_size: 100 * 1024,              // 100KB
            max_part_count: 10_000,
            retry_limit: 5,
            retry_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(60),
            skew_tolerance_secs: 5,
            checkpoint_dir: None,
        }
    }
}

impl SyncConfig {
    /// 计算分片大小：优先保证分片数不超过上限，再套用默认/最小分片大小
    pub fn part_size_for(&self, total_size: u64) -> u64 {
        total_size
            .div_ceil(self.max_part_count)
            .max(self.default_part_size)
            .max(self.min_part_size)
    }
}

/// syncUp 的单次调用选项
#[derive(Debug, Clone, Default)]
pub struct SyncUpOptions {
    /// 是否删除远端多余的对象
    pub delete_removed: bool,
    /// 忽略规则：相对路径精确匹配、祖先目录匹配，含 * 时按通配符匹配
    pub ignore: Vec<String>,
    /// 所有上传共用的请求头
    pub default_headers: Headers,
    /// 按目标 key 的请求头覆盖，优先级高于 default_headers
    pub key_headers: HashMap<String, Headers>,
    /// 是否逐文件输出进度日志
    pub verbose: bool,
}

impl SyncUpOptions {
    /// 合并请求头：default 层在下，按 key 的覆盖层在上
    pub fn headers_for(&self, key: &str) -> Headers {
        let mut merged = self.default_headers.clone();
        if let Some(overlay) = self.key_headers.get(key) {
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// syncDown 的单次调用选项
#[derive(Debug, Clone, Default)]
pub struct SyncDownOptions {
    /// 是否删除本地多余的文件
    pub delete_removed: bool,
    /// 是否逐文件输出进度日志
    pub verbose: bool,
}
