//! 测试用内存对象存储，支持失败注入与真实的分片断点续传
#![allow(dead_code)]

use async_trait::async_trait;
use oss_sync::storage::{
    DeleteResult, Headers, ListPage, MetaField, ObjectStore, PartCallback, PutResult, RemoteFile,
    StoreError, UploadCheckpoint,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 存入 mock 的对象
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub last_modified: i64,
    pub headers: Headers,
}

/// 进行中的分片上传会话
#[derive(Debug, Clone)]
struct UploadSession {
    parts_done: Vec<u32>,
}

/// 内存对象存储
///
/// 分片上传维护服务端会话，resume 时跳过已完成的分片；
/// 通过注入队列和开关模拟瞬时失败、会话过期等场景。
#[derive(Default)]
pub struct MockStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, UploadSession>>,
    upload_seq: AtomicU32,

    // 失败注入
    put_failures: Mutex<VecDeque<StoreError>>,
    get_failures: Mutex<VecDeque<StoreError>>,
    list_failures: Mutex<VecDeque<StoreError>>,
    delete_failures: Mutex<VecDeque<StoreError>>,
    fail_all_puts: AtomicBool,
    fail_all_deletes: AtomicBool,
    /// 下一次分片上传在传完 N 个分片后瞬时失败（一次性）
    fail_after_parts: Mutex<Option<u32>>,
    /// resume 时宣告会话过期
    expire_on_resume: AtomicBool,

    // 调用计数
    pub put_calls: AtomicU32,
    pub get_calls: AtomicU32,
    pub delete_calls: AtomicU32,
    pub list_calls: AtomicU32,
    pub parts_uploaded: AtomicU32,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_object(&self, key: &str, data: &[u8], last_modified: i64) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                last_modified,
                headers: Headers::new(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// 预置一个服务端分片会话（模拟跨进程续传）
    pub fn seed_upload_session(&self, upload_id: &str, parts_done: Vec<u32>) {
        self.uploads
            .lock()
            .unwrap()
            .insert(upload_id.to_string(), UploadSession { parts_done });
    }

    pub fn inject_put_failure(&self, error: StoreError) {
        self.put_failures.lock().unwrap().push_back(error);
    }

    pub fn inject_get_failure(&self, error: StoreError) {
        self.get_failures.lock().unwrap().push_back(error);
    }

    pub fn inject_list_failure(&self, error: StoreError) {
        self.list_failures.lock().unwrap().push_back(error);
    }

    pub fn inject_delete_failure(&self, error: StoreError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    pub fn set_fail_all_puts(&self, on: bool) {
        self.fail_all_puts.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_all_deletes(&self, on: bool) {
        self.fail_all_deletes.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_after_parts(&self, parts: u32) {
        *self.fail_after_parts.lock().unwrap() = Some(parts);
    }

    pub fn set_expire_on_resume(&self, on: bool) {
        self.expire_on_resume.store(on, Ordering::SeqCst);
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn list_page(
        &self,
        prefix: &str,
        max_keys: usize,
        marker: Option<&str>,
        _projection: Option<&[MetaField]>,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let objects_map = self.objects.lock().unwrap();
        let mut objects = Vec::new();
        for (key, obj) in objects_map.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(m) = marker {
                if key.as_str() <= m {
                    continue;
                }
            }
            objects.push(RemoteFile {
                key: key.clone(),
                last_modified: obj.last_modified,
                size: Some(obj.data.len() as u64),
                etag: None,
            });
            if objects.len() >= max_keys {
                break;
            }
        }

        let next_marker = if objects.len() >= max_keys {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_marker,
        })
    }

    async fn put(
        &self,
        key: &str,
        source: &Path,
        _timeout: Duration,
        headers: &Headers,
    ) -> Result<PutResult, StoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_puts.load(Ordering::SeqCst) {
            return Err(StoreError::ResponseTimeout(key.to_string()));
        }
        if let Some(err) = self.put_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let data = tokio::fs::read(source)
            .await
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Self::now(),
                headers: headers.clone(),
            },
        );
        Ok(PutResult {
            key: key.to_string(),
            etag: None,
        })
    }

    async fn multipart_put(
        &self,
        key: &str,
        source: &Path,
        part_size: u64,
        checkpoint: Option<UploadCheckpoint>,
        headers: &Headers,
        on_part: PartCallback,
    ) -> Result<PutResult, StoreError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
        let total_size = data.len() as u64;
        let part_count = total_size.div_ceil(part_size).max(1) as u32;

        let (upload_id, mut parts_done) = match checkpoint {
            Some(cp) => {
                if self.expire_on_resume.load(Ordering::SeqCst) {
                    self.uploads.lock().unwrap().remove(&cp.upload_id);
                    return Err(StoreError::ExpiredUpload(key.to_string()));
                }
                let uploads = self.uploads.lock().unwrap();
                match uploads.get(&cp.upload_id) {
                    Some(session) => (cp.upload_id.clone(), session.parts_done.clone()),
                    None => return Err(StoreError::ExpiredUpload(key.to_string())),
                }
            }
            None => {
                let id = format!("upload-{}", self.upload_seq.fetch_add(1, Ordering::SeqCst));
                self.uploads
                    .lock()
                    .unwrap()
                    .insert(id.clone(), UploadSession { parts_done: vec![] });
                (id, Vec::new())
            }
        };

        let mut uploaded_this_call = 0u32;
        for part in 1..=part_count {
            // 已完成的分片不重传
            if parts_done.contains(&part) {
                continue;
            }

            {
                let mut fail_after = self.fail_after_parts.lock().unwrap();
                if let Some(limit) = *fail_after {
                    if uploaded_this_call >= limit {
                        fail_after.take();
                        return Err(StoreError::Request(format!("注入的分片失败: {}", key)));
                    }
                }
            }

            self.parts_uploaded.fetch_add(1, Ordering::SeqCst);
            uploaded_this_call += 1;
            parts_done.push(part);
            if let Some(session) = self.uploads.lock().unwrap().get_mut(&upload_id) {
                session.parts_done = parts_done.clone();
            }

            on_part(UploadCheckpoint {
                upload_id: upload_id.clone(),
                key: key.to_string(),
                total_size,
                part_size,
                parts_done: parts_done.clone(),
            });
        }

        self.uploads.lock().unwrap().remove(&upload_id);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Self::now(),
                headers: headers.clone(),
            },
        );
        Ok(PutResult {
            key: key.to_string(),
            etag: None,
        })
    }

    async fn get(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.get_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let data = match self.objects.lock().unwrap().get(key) {
            Some(obj) => obj.data.clone(),
            None => return Err(StoreError::NotFound(key.to_string())),
        };
        tokio::fs::write(dest, data)
            .await
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<DeleteResult, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectTimeout(key.to_string()));
        }
        if let Some(err) = self.delete_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.objects.lock().unwrap().remove(key);
        Ok(DeleteResult {
            key: key.to_string(),
        })
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        if let Some(err) = self.delete_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut objects = self.objects.lock().unwrap();
        let mut deleted = Vec::new();
        for key in keys {
            if objects.remove(key).is_some() {
                deleted.push(key.clone());
            }
        }
        Ok(deleted)
    }

    async fn set_metadata(&self, key: &str, headers: &Headers) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        match objects.get_mut(key) {
            Some(obj) => {
                for (k, v) in headers {
                    obj.headers.insert(k.clone(), v.clone());
                }
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 测试用引擎配置：阈值和分片都缩小，重试不等待
pub fn test_config() -> oss_sync::SyncConfig {
    oss_sync::SyncConfig {
        concurrency: 4,
        large_file_threshold: 64,
        default_part_size: 16,
        min_part_size: 1,
        max_part_count: 10_000,
        retry_limit: 3,
        retry_delay: Duration::from_millis(0),
        request_timeout: Duration::from_secs(5),
        skew_tolerance_secs: 5,
        checkpoint_dir: None,
    }
}

/// 在目录下写入一个文件，自动创建父目录
pub fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
