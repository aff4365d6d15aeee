//! # テスト用共通ヘルパー
//!
//! server, client, storage テストで共有するモックストレージとモックストリーム。

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use socio_types::UploadRequest;

use crate::error::UploadError;
use crate::server::UploadStream;
use crate::storage::ArtifactStore;

/// 保存内容をメモリに保持するモックストア。
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    deleted: Mutex<Vec<String>>,
    /// 保存時に呼ばれたローカルパス
    seen_paths: Mutex<Vec<std::path::PathBuf>>,
}

impl MemoryStore {
    pub fn insert(&self, name: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (bytes.to_vec(), String::new()));
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(name).map(|(b, _)| b.clone())
    }

    pub fn content_type(&self, name: &str) -> Option<String> {
        self.objects.lock().unwrap().get(name).map(|(_, ct)| ct.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn seen_paths(&self) -> Vec<std::path::PathBuf> {
        self.seen_paths.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MemoryStore {
    async fn store(
        &self,
        name: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;
        self.seen_paths.lock().unwrap().push(local_path.to_path_buf());
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), UploadError> {
        self.objects.lock().unwrap().remove(name);
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// 常に失敗するモックストア。呼び出し回数を記録する。
#[derive(Default)]
pub struct FailingStore {
    pub calls: Mutex<usize>,
}

#[async_trait::async_trait]
impl ArtifactStore for FailingStore {
    async fn store(&self, _: &str, _: &Path, _: &str) -> Result<(), UploadError> {
        *self.calls.lock().unwrap() += 1;
        Err(UploadError::Storage("バケットに到達できません".into()))
    }

    async fn delete(&self, _: &str) -> Result<(), UploadError> {
        Err(UploadError::Storage("バケットに到達できません".into()))
    }
}

/// 保存が呼ばれたら完了しないモックストア。キャンセルのテスト用。
pub struct PendingStore;

#[async_trait::async_trait]
impl ArtifactStore for PendingStore {
    async fn store(&self, _: &str, _: &Path, _: &str) -> Result<(), UploadError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn delete(&self, _: &str) -> Result<(), UploadError> {
        Ok(())
    }
}

/// 用意した受信結果を順に返すモックストリーム。
/// 全て返し終えると、`hang_at_end` なら永久に待ち、そうでなければ終端を返す。
pub struct ScriptedStream {
    items: VecDeque<Result<UploadRequest, UploadError>>,
    hang_at_end: bool,
}

impl ScriptedStream {
    pub fn chunks(name: &str, content_type: &str, chunks: &[&[u8]]) -> Self {
        Self {
            items: chunks
                .iter()
                .map(|c| {
                    Ok(UploadRequest {
                        file_name: name.to_string(),
                        chunk: c.to_vec(),
                        content_type: content_type.to_string(),
                    })
                })
                .collect(),
            hang_at_end: false,
        }
    }

    pub fn from_results(items: Vec<Result<UploadRequest, UploadError>>) -> Self {
        Self {
            items: items.into(),
            hang_at_end: false,
        }
    }

    /// 終端を送らずに待ち続けるようにする。
    pub fn hanging(mut self) -> Self {
        self.hang_at_end = true;
        self
    }
}

#[async_trait::async_trait]
impl UploadStream for ScriptedStream {
    async fn recv(&mut self) -> Result<Option<UploadRequest>, UploadError> {
        match self.items.pop_front() {
            Some(item) => item.map(Some),
            None if self.hang_at_end => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// 一時ディレクトリ内のファイル数
pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

pub fn request(name: &str, chunk: &[u8]) -> UploadRequest {
    UploadRequest {
        file_name: name.to_string(),
        chunk: chunk.to_vec(),
        content_type: "text/plain".to_string(),
    }
}
