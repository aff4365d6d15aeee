//! # ファイルシステム ArtifactStore
//!
//! ローカルディレクトリにアーティファクトを保存する。開発・テスト環境用。
//!
//! ディレクトリ構成: `{root}/{name}`

use std::path::{Path, PathBuf};

use super::{is_default_avatar, ArtifactStore};
use crate::error::UploadError;

/// ローカルディレクトリに保存するArtifactStore。
///
/// 保存は同じディレクトリ内の一時名にコピーしてからリネームするため、
/// 読み手が書きかけのファイルを見ることはない。
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// 新しいLocalArtifactStoreを作成する。
    ///
    /// # 引数
    /// - `root`: アーティファクトを格納するディレクトリ（なければ保存時に作成）
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 格納ディレクトリ
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 名前を格納先パスに変換する。パス要素を含む名前は拒否する。
    fn object_path(&self, name: &str) -> Result<PathBuf, UploadError> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(UploadError::Storage(format!(
                "オブジェクト名が不正です: {name:?}"
            )));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait::async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store(
        &self,
        name: &str,
        local_path: &Path,
        _content_type: &str,
    ) -> Result<(), UploadError> {
        let dest = self.object_path(name)?;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            UploadError::Storage(format!(
                "格納ディレクトリを作成できません ({}): {e}",
                self.root.display()
            ))
        })?;

        let staging = self.root.join(format!(".{name}.{}.partial", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::copy(local_path, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(UploadError::Storage(format!(
                "アーティファクトのコピーに失敗 ({name}): {e}"
            )));
        }

        if let Err(e) = tokio::fs::rename(&staging, &dest).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(UploadError::Storage(format!(
                "アーティファクトの確定に失敗 ({name}): {e}"
            )));
        }

        tracing::debug!(path = %dest.display(), "ローカルに保存");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), UploadError> {
        if is_default_avatar(name) {
            return Ok(());
        }

        let path = self.object_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::Storage(format!(
                "オブジェクト削除に失敗 ({name}): {e}"
            ))),
        }
    }
}
