use super::{
    DeleteResult, Headers, ListPage, MetaField, ObjectStore, PartCallback, PutResult, RemoteFile,
    StoreError, UploadCheckpoint, IO_TIMEOUT_SECS, MAX_KEYS_PER_PAGE, OP_TIMEOUT_SECS,
};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, services::Oss, Metakey, Operator};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// 阿里云 OSS 存储实现（基于 opendal）
///
/// opendal 无法重新挂接服务端已存在的分片上传会话，因此收到断点时
/// 返回 [`StoreError::ExpiredUpload`]，由引擎清除断点后重新上传该对象。
pub struct OssStore {
    operator: Operator,
    name: String,
}

impl OssStore {
    pub fn new(
        bucket: &str,
        endpoint: &str,
        access_key_id: &str,
        access_key_secret: &str,
        root: Option<String>,
    ) -> Result<Self, StoreError> {
        let mut builder = Oss::default()
            .bucket(bucket)
            .endpoint(endpoint)
            .access_key_id(access_key_id)
            .access_key_secret(access_key_secret);

        if let Some(ref p) = root {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "oss://{}{}",
            bucket,
            root.as_deref()
                .map(|p| format!("/{}", p.trim_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    fn map_err(key: &str, e: opendal::Error) -> StoreError {
        if e.kind() == opendal::ErrorKind::NotFound {
            return StoreError::NotFound(key.to_string());
        }
        // 瞬时判定统一生效：opendal 标记为临时的错误都按可重试处理
        if e.is_temporary() {
            return StoreError::Request(format!("{}: {}", key, e));
        }
        StoreError::Other(anyhow::Error::new(e))
    }
}

#[async_trait]
impl ObjectStore for OssStore {
    async fn list_page(
        &self,
        prefix: &str,
        max_keys: usize,
        marker: Option<&str>,
        projection: Option<&[MetaField]>,
    ) -> Result<ListPage, StoreError> {
        let max_keys = max_keys.min(MAX_KEYS_PER_PAGE);

        // 修改时间总是取回（增量比较必需），投影只裁剪大小和 etag
        let want = |f: MetaField| projection.map_or(true, |p| p.contains(&f));
        let metakey = match (want(MetaField::Size), want(MetaField::Etag)) {
            (true, true) => {
                Metakey::Mode | Metakey::LastModified | Metakey::ContentLength | Metakey::Etag
            }
            (true, false) => Metakey::Mode | Metakey::LastModified | Metakey::ContentLength,
            (false, true) => Metakey::Mode | Metakey::LastModified | Metakey::Etag,
            (false, false) => Metakey::Mode | Metakey::LastModified,
        };

        let mut lister = self
            .operator
            .lister_with(prefix)
            .recursive(true)
            .metakey(metakey)
            .await
            .map_err(|e| Self::map_err(prefix, e))?;

        let mut objects = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| Self::map_err(prefix, e))?
        {
            let path = entry.path().to_string();
            if path.is_empty() || path == "/" {
                continue;
            }

            let meta = entry.metadata();
            if meta.is_dir() {
                continue;
            }

            let key = path.trim_start_matches('/').to_string();
            // opendal 不暴露列举游标，按字典序跳过 marker 之前的条目
            if let Some(m) = marker {
                if key.as_str() <= m {
                    continue;
                }
            }

            objects.push(RemoteFile {
                key,
                last_modified: meta.last_modified().map_or(0, |t| t.timestamp()),
                size: want(MetaField::Size).then(|| meta.content_length()),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
            });

            if objects.len() >= max_keys {
                let next_marker = objects.last().map(|o| o.key.clone());
                return Ok(ListPage {
                    objects,
                    next_marker,
                });
            }
        }

        Ok(ListPage {
            objects,
            next_marker: None,
        })
    }

    async fn put(
        &self,
        key: &str,
        source: &Path,
        timeout: Duration,
        headers: &Headers,
    ) -> Result<PutResult, StoreError> {
        let data = tokio::fs::read(source)
            .await
            .with_context(|| format!("读取本地文件失败: {}", source.display()))?;

        let mut write = self.operator.write_with(key, data);
        for (name, value) in headers {
            write = match name.to_ascii_lowercase().as_str() {
                "content-type" => write.content_type(value),
                "content-disposition" => write.content_disposition(value),
                "cache-control" => write.cache_control(value),
                _ => {
                    tracing::debug!("忽略 opendal 不支持的请求头: {}", name);
                    write
                }
            };
        }

        match tokio::time::timeout(timeout, write).await {
            Ok(result) => {
                result.map_err(|e| Self::map_err(key, e))?;
                Ok(PutResult {
                    key: key.to_string(),
                    etag: None,
                })
            }
            Err(_) => Err(StoreError::ResponseTimeout(key.to_string())),
        }
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
        // 无法恢复服务端会话，已有断点按过期处理
        if checkpoint.is_some() {
            return Err(StoreError::ExpiredUpload(key.to_string()));
        }

        let meta = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("读取本地文件信息失败: {}", source.display()))?;
        let total_size = meta.len();
        let part_count = total_size.div_ceil(part_size).max(1);
        let upload_id = uuid::Uuid::new_v4().to_string();

        let mut writer_fut = self.operator.writer_with(key).chunk(part_size as usize);
        for (name, value) in headers {
            writer_fut = match name.to_ascii_lowercase().as_str() {
                "content-type" => writer_fut.content_type(value),
                "content-disposition" => writer_fut.content_disposition(value),
                "cache-control" => writer_fut.cache_control(value),
                _ => {
                    tracing::debug!("忽略 opendal 不支持的请求头: {}", name);
                    writer_fut
                }
            };
        }
        let mut writer = writer_fut.await.map_err(|e| Self::map_err(key, e))?;

        let mut file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("打开本地文件失败: {}", source.display()))?;

        let mut parts_done: Vec<u32> = Vec::with_capacity(part_count as usize);
        for part in 1..=part_count {
            let offset = (part - 1) * part_size;
            let len = part_size.min(total_size - offset) as usize;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)
                .await
                .with_context(|| format!("读取分片 {} 失败: {}", part, source.display()))?;

            writer
                .write(Bytes::from(buf))
                .await
                .map_err(|e| Self::map_err(key, e))?;

            parts_done.push(part as u32);
            on_part(UploadCheckpoint {
                upload_id: upload_id.clone(),
                key: key.to_string(),
                total_size,
                part_size,
                parts_done: parts_done.clone(),
            });
        }

        writer.close().await.map_err(|e| Self::map_err(key, e))?;

        Ok(PutResult {
            key: key.to_string(),
            etag: None,
        })
    }

    async fn get(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建本地目录失败: {}", parent.display()))?;
        }

        let data = self
            .operator
            .read(key)
            .await
            .map_err(|e| Self::map_err(key, e))?;

        tokio::fs::write(dest, data.to_vec())
            .await
            .with_context(|| format!("写入本地文件失败: {}", dest.display()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<DeleteResult, StoreError> {
        // OSS 删除不存在的对象不会报错
        self.operator
            .delete(key)
            .await
            .map_err(|e| Self::map_err(key, e))?;
        Ok(DeleteResult {
            key: key.to_string(),
        })
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.operator
            .remove(keys.to_vec())
            .await
            .map_err(|e| Self::map_err(&keys[0], e))?;
        Ok(keys.to_vec())
    }

    async fn set_metadata(&self, key: &str, headers: &Headers) -> Result<(), StoreError> {
        // opendal 没有就地更新元数据的原语，以同内容重写对象的方式生效
        let data = self
            .operator
            .read(key)
            .await
            .map_err(|e| Self::map_err(key, e))?;

        let mut write = self.operator.write_with(key, data.to_vec());
        for (name, value) in headers {
            write = match name.to_ascii_lowercase().as_str() {
                "content-type" => write.content_type(value),
                "content-disposition" => write.content_disposition(value),
                "cache-control" => write.cache_control(value),
                _ => {
                    tracing::debug!("忽略 opendal 不支持的请求头: {}", name);
                    write
                }
            };
        }
        write.await.map_err(|e| Self::map_err(key, e))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
