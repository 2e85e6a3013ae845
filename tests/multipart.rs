//! 分片上传与断点续传

mod common;

use common::{test_config, write_file, MockStore};
use oss_sync::{SyncEngine, SyncUpOptions, UploadCheckpoint};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// 100 字节文件在测试配置（阈值 64、分片 16）下共 7 个分片
const BIG: usize = 100;
const PARTS: u32 = 7;

#[tokio::test]
async fn small_file_takes_single_shot_path() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "small.bin", &vec![7u8; 63]);

    let store = Arc::new(MockStore::new());
    let engine = SyncEngine::with_config(store.clone(), test_config());

    engine
        .sync_up(dir.path(), "data", &SyncUpOptions::default())
        .await
        .unwrap();

    assert_eq!(store.put_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.parts_uploaded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn large_file_is_uploaded_in_parts() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "big.bin", &vec![9u8; BIG]);

    let store = Arc::new(MockStore::new());
    let engine = SyncEngine::with_config(store.clone(), test_config());

    let outcome = engine
        .sync_up(dir.path(), "data", &SyncUpOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.put.len(), 1);
    assert_eq!(store.put_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.parts_uploaded.load(Ordering::SeqCst), PARTS);
    assert_eq!(store.object("data/big.bin").unwrap().data.len(), BIG);
}

#[tokio::test]
async fn scenario_c_interrupted_multipart_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "big.bin", &vec![9u8; BIG]);

    let store = Arc::new(MockStore::new());
    // 传完 3 个分片后瞬时失败一次
    store.set_fail_after_parts(3);

    let engine = SyncEngine::with_config(store.clone(), test_config());
    let outcome = engine
        .sync_up(dir.path(), "data", &SyncUpOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.put.len(), 1);
    // 续传只补齐剩余 4 个分片，已完成的 3 个分片不重传
    assert_eq!(store.parts_uploaded.load(Ordering::SeqCst), PARTS);
    assert_eq!(store.object("data/big.bin").unwrap().data.len(), BIG);
}

#[tokio::test]
async fn expired_upload_session_restarts_object_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "big.bin", &vec![9u8; BIG]);

    let store = Arc::new(MockStore::new());
    store.set_fail_after_parts(3);
    store.set_expire_on_resume(true);

    let engine = SyncEngine::with_config(store.clone(), test_config());
    let outcome = engine
        .sync_up(dir.path(), "data", &SyncUpOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.put.len(), 1);
    // 3 个分片作废 + 整个对象重新上传 7 个分片
    assert_eq!(store.parts_uploaded.load(Ordering::SeqCst), 3 + PARTS);
    assert_eq!(store.object("data/big.bin").unwrap().data.len(), BIG);
}

#[tokio::test]
async fn checkpoint_file_enables_resume_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "big.bin", &vec![9u8; BIG]);

    let store = Arc::new(MockStore::new());
    // 服务端还保留着前 3 个分片的会话
    store.seed_upload_session("upload-prev", vec![1, 2, 3]);

    let checkpoint_dir = tempfile::tempdir().unwrap();
    let checkpoint = UploadCheckpoint {
        upload_id: "upload-prev".to_string(),
        key: "data/big.bin".to_string(),
        total_size: BIG as u64,
        part_size: 16,
        parts_done: vec![1, 2, 3],
    };
    let mut map = std::collections::HashMap::new();
    map.insert(checkpoint.key.clone(), checkpoint);
    std::fs::write(
        checkpoint_dir.path().join("data.checkpoints.json"),
        serde_json::to_vec(&map).unwrap(),
    )
    .unwrap();

    let mut config = test_config();
    config.checkpoint_dir = Some(checkpoint_dir.path().to_path_buf());
    let engine = SyncEngine::with_config(store.clone(), config);

    let outcome = engine
        .sync_up(dir.path(), "data", &SyncUpOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.put.len(), 1);
    // 从落盘断点恢复，只上传剩余 4 个分片
    assert_eq!(store.parts_uploaded.load(Ordering::SeqCst), PARTS - 3);
    // 成功后断点文件被清除
    assert!(!checkpoint_dir.path().join("data.checkpoints.json").exists());
}
