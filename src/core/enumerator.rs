//! 本地文件树枚举

use crate::error::SyncError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 本地文件记录，按目标 key 索引，单次会话内唯一
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// 目标 key（前缀 + 相对路径）
    pub key: String,
    /// 本地绝对路径
    pub path: PathBuf,
    /// 修改时间（Unix 秒）
    pub modified: i64,
    pub size: u64,
}

/// 忽略规则集合
///
/// 规则按相对路径精确匹配或祖先目录匹配；含 * 的规则按通配符匹配。
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<String>,
    patterns: Vec<regex::Regex>,
}

impl IgnoreRules {
    pub fn new(rules: &[String]) -> Self {
        let mut plain = Vec::new();
        let mut patterns = Vec::new();

        for rule in rules {
            let rule = rule.trim_matches('/').to_string();
            if rule.is_empty() {
                continue;
            }
            if rule.contains('*') {
                let regex_pattern = rule.replace('.', "\\.").replace('*', ".*");
                if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
                    patterns.push(re);
                }
            } else {
                plain.push(rule);
            }
        }

        Self {
            rules: plain,
            patterns,
        }
    }

    /// 相对路径是否命中忽略规则
    pub fn matches(&self, rel_path: &str) -> bool {
        for rule in &self.rules {
            if rel_path == rule || rel_path.starts_with(&format!("{}/", rule)) {
                return true;
            }
        }
        self.patterns.iter().any(|re| re.is_match(rel_path))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.patterns.is_empty()
    }
}

/// 规范化路径分隔符（统一使用 /）
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// 递归枚举本地目录，返回目标 key 到文件记录的映射
///
/// 根目录不存在时返回 [`SyncError::NotFound`]，不重试。
pub async fn enumerate_local(
    root: &Path,
    key_prefix: &str,
    ignore: &IgnoreRules,
) -> Result<HashMap<String, LocalFile>, SyncError> {
    if !root.exists() {
        return Err(SyncError::NotFound(root.to_path_buf()));
    }

    let base = root.to_path_buf();
    let prefix = key_prefix.trim_matches('/').to_string();
    let ignore = ignore.clone();

    // 使用 spawn_blocking 避免阻塞 async runtime
    let entries: Vec<LocalFile> = tokio::task::spawn_blocking(move || {
        let mut excluded = 0usize;
        let files: Vec<LocalFile> = WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if metadata.is_dir() {
                    return None;
                }

                let relative = entry.path().strip_prefix(&base).ok()?.to_str()?;
                let relative = normalize_path(relative);
                if relative.is_empty() {
                    return None;
                }

                if ignore.matches(&relative) {
                    debug!("忽略文件: {}", relative);
                    excluded += 1;
                    return None;
                }

                let modified = metadata
                    .modified()
                    .ok()?
                    .duration_since(std::time::UNIX_EPOCH)
                    .ok()?
                    .as_secs() as i64;

                let key = if prefix.is_empty() {
                    relative.clone()
                } else {
                    format!("{}/{}", prefix, relative)
                };

                Some(LocalFile {
                    key,
                    path: entry.path().to_path_buf(),
                    modified,
                    size: metadata.len(),
                })
            })
            .collect();

        if excluded > 0 {
            debug!("共忽略 {} 个文件", excluded);
        }
        files
    })
    .await
    .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;

    let mut tree = HashMap::with_capacity(entries.len());
    for file in entries {
        tree.insert(file.key.clone(), file);
    }

    info!("本地扫描完成: {} 个文件", tree.len());
    Ok(tree)
}
