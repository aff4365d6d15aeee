//! # 一時アーティファクト
//!
//! アップロード1回分のチャンクを組み立てるローカル一時ファイル。
//! ランダムな識別子で作成され、1つのハンドラ呼び出しだけが所有する。

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::UploadError;

/// アップロード1回分の一時ファイル。
///
/// `remove` で明示的に削除する。削除されないまま破棄された場合
/// （タスクの中断など）は `Drop` で同期的に削除を試みる。
#[derive(Debug)]
pub struct TemporaryArtifact {
    id: uuid::Uuid,
    path: PathBuf,
    file: Option<tokio::fs::File>,
    removed: bool,
    #[cfg(test)]
    write_budget: Option<u64>,
}

impl TemporaryArtifact {
    /// `dir` に新しい一時ファイルを作成する。既存ファイルは決して再利用しない。
    pub async fn create(dir: &Path) -> Result<Self, UploadError> {
        let id = uuid::Uuid::new_v4();
        let path = dir.join(format!("upload-{id}.tmp"));

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                UploadError::LocalResource(format!(
                    "一時ファイルの作成に失敗 ({}): {e}",
                    path.display()
                ))
            })?;

        Ok(Self {
            id,
            path,
            file: Some(file),
            removed: false,
            #[cfg(test)]
            write_budget: faults::write_budget(dir),
        })
    }

    /// 一時ファイルの識別子
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// 一時ファイルのパス
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 末尾にバイト列を追記する。
    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), UploadError> {
        let file = self.file.as_mut().ok_or_else(|| {
            UploadError::LocalResource("クローズ済みの一時ファイルに書き込もうとしました".into())
        })?;

        #[cfg(test)]
        let written = match self.write_budget.as_mut() {
            Some(budget) if (bytes.len() as u64) > *budget => {
                Err(std::io::Error::other("書き込み上限に達しました"))
            }
            Some(budget) => {
                *budget -= bytes.len() as u64;
                file.write_all(bytes).await
            }
            None => file.write_all(bytes).await,
        };
        #[cfg(not(test))]
        let written = file.write_all(bytes).await;

        written.map_err(|e| {
            UploadError::LocalResource(format!(
                "一時ファイルへの書き込みに失敗 ({}): {e}",
                self.path.display()
            ))
        })
    }

    /// 書き込みを完了し、ハンドルを閉じる。以降はパス経由で読み取れる。
    pub async fn close(&mut self) -> Result<(), UploadError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| {
                UploadError::LocalResource(format!(
                    "一時ファイルのフラッシュに失敗 ({}): {e}",
                    self.path.display()
                ))
            })?;
        }
        Ok(())
    }

    /// ハンドルを閉じてファイルを削除する。
    pub async fn remove(mut self) -> Result<(), UploadError> {
        // 削除できなくてもDropで再試行しない
        self.removed = true;
        let closed = self.close().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(UploadError::LocalResource(format!(
                    "一時ファイルの削除に失敗 ({}): {e}",
                    self.path.display()
                )))
            }
        }
        closed
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "破棄時の一時ファイル削除に失敗"
                );
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_close_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = TemporaryArtifact::create(dir.path()).await.unwrap();
        let path = artifact.path().to_path_buf();

        artifact.append(b"hello ").await.unwrap();
        artifact.append(b"world").await.unwrap();
        artifact.close().await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");

        // クローズ後の書き込みはエラー
        assert!(artifact.append(b"!").await.is_err());

        artifact.remove().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_identifiers_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = TemporaryArtifact::create(dir.path()).await.unwrap();
        let b = TemporaryArtifact::create(dir.path()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = TemporaryArtifact::create(dir.path()).await.unwrap();
        artifact.append(b"partial").await.unwrap();
        let path = artifact.path().to_path_buf();

        drop(artifact);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_local_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        faults::limit_writes(dir.path(), 4);
        let mut artifact = TemporaryArtifact::create(dir.path()).await.unwrap();

        artifact.append(b"abcd").await.unwrap();
        let err = artifact.append(b"e").await.unwrap_err();
        assert!(matches!(err, UploadError::LocalResource(_)));

        artifact.remove().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_create_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemporaryArtifact::create(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::LocalResource(_)));
    }
}
