//! # Gateway APIエンドポイント
//!
//! 各エンドポイントはmultipartのファイルをいったん一時ファイルに書き出し、
//! それをチャンクに分けてバックエンドへストリーミングする。

pub mod attachments;
pub mod avatar;

use axum::extract::multipart::Field;
use socio_types::{UploadResponse, UploadService};
use socio_upload::UploadMetadata;
use tokio::io::AsyncWriteExt;

use crate::config::GatewayState;
use crate::error::GatewayError;

pub use attachments::handle_post_attachments;
pub use avatar::{handle_group_avatar, handle_profile_avatar};

/// 一時ファイルに書き出したmultipartのファイル。
///
/// `NamedTempFile` のドロップでファイルは削除される。
pub(crate) struct BufferedFile {
    file: tempfile::NamedTempFile,
    meta: UploadMetadata,
    size: u64,
}

impl BufferedFile {
    /// フィールドの内容を最後まで一時ファイルに書き出す。
    pub(crate) async fn from_field(mut field: Field<'_>) -> Result<Self, GatewayError> {
        let meta = UploadMetadata::new(
            field.file_name().unwrap_or_default(),
            field.content_type().unwrap_or_default(),
        );

        let file = tempfile::Builder::new()
            .prefix("socio-gateway-")
            .tempfile()
            .map_err(|e| GatewayError::Internal(format!("一時ファイルを作成できません: {e}")))?;
        let handle = file
            .reopen()
            .map_err(|e| GatewayError::Internal(format!("一時ファイルを開けません: {e}")))?;
        let mut out = tokio::fs::File::from_std(handle);

        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            out.write_all(&chunk)
                .await
                .map_err(|e| GatewayError::Internal(format!("一時ファイルへの書き込みに失敗: {e}")))?;
            size += chunk.len() as u64;
        }
        out.flush()
            .await
            .map_err(|e| GatewayError::Internal(format!("一時ファイルへの書き込みに失敗: {e}")))?;

        Ok(Self { file, meta, size })
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// バックエンドの指定サービスへアップロードする。
    pub(crate) async fn upload(
        &self,
        state: &GatewayState,
        service: UploadService,
    ) -> Result<UploadResponse, GatewayError> {
        let source = tokio::fs::File::open(self.file.path())
            .await
            .map_err(|e| GatewayError::Internal(format!("一時ファイルを開けません: {e}")))?;
        let cancel = state.shutdown.child_token();

        let res = state
            .upload_client
            .upload_file(service, source, &self.meta, &cancel)
            .await?;

        tracing::info!(
            %service,
            original_name = %self.meta.file_name,
            file_name = %res.file_name,
            size = res.size,
            "アップロード完了"
        );
        Ok(res)
    }
}
