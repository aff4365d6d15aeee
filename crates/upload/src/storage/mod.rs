//! # ArtifactStore
//!
//! 完成した一時アーティファクトを受け取る永続ストレージの抽象インターフェース。
//! 用途（添付ファイル・ユーザーアバター・グループアバター）ごとに
//! 独立したインスタンスを持つが、契約は共通。
//!
//! ## 実装
//! - `S3ArtifactStore`: S3互換オブジェクトストレージ（MinIO, AWS S3等）
//! - `LocalArtifactStore`: ローカルディレクトリ（開発・テスト用）

pub mod local;
#[cfg(feature = "vendor-aws")]
pub mod s3;

pub use local::LocalArtifactStore;
#[cfg(feature = "vendor-aws")]
pub use s3::{S3ArtifactStore, S3Settings};

use std::path::Path;
use std::sync::Arc;

use crate::error::UploadError;

/// ユーザーアバター未設定時に使われる名前
pub const DEFAULT_AVATAR_FILE_NAME: &str = "default_avatar.png";
/// グループアバター未設定時に使われる名前
pub const DEFAULT_GROUP_AVATAR_FILE_NAME: &str = "default_group_avatar.png";

/// 削除してはならない既定アバターかどうか。
pub fn is_default_avatar(name: &str) -> bool {
    name == DEFAULT_AVATAR_FILE_NAME || name == DEFAULT_GROUP_AVATAR_FILE_NAME
}

/// 永続ストレージの抽象インターフェース。
///
/// リトライは行わない。`store` の失敗はアップロード全体の失敗になる。
/// 同名への上書きは後勝ちでよく、排他制御はバックエンドに任せる。
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    /// `local_path` のファイルを `name` として保存する。
    async fn store(
        &self,
        name: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError>;

    /// `name` のオブジェクトを削除する。
    async fn delete(&self, name: &str) -> Result<(), UploadError>;
}

#[async_trait::async_trait]
impl<T: ArtifactStore + ?Sized> ArtifactStore for Arc<T> {
    async fn store(
        &self,
        name: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        (**self).store(name, local_path, content_type).await
    }

    async fn delete(&self, name: &str) -> Result<(), UploadError> {
        (**self).delete(name).await
    }
}

/// アバター差し替え後に古いオブジェクトを削除する。
///
/// 新しいアバターのコミット後に、プロフィール・グループを更新する側から呼ぶ。
/// 空の名前・既定アバター・新しい名前と同一の場合は何もしない。
pub async fn delete_replaced<S: ArtifactStore + ?Sized>(
    store: &S,
    previous: &str,
    current: &str,
) -> Result<(), UploadError> {
    if previous.is_empty() || previous == current || is_default_avatar(previous) {
        return Ok(());
    }
    tracing::info!(previous = %previous, current = %current, "差し替え前のオブジェクトを削除");
    store.delete(previous).await
}
