//! # POST /posts/attachments
//!
//! 投稿の添付ファイルのアップロード。

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use socio_types::{UploadService, UploadedFilesResponse};

use super::BufferedFile;
use crate::config::GatewayState;
use crate::error::GatewayError;

/// POST /posts/attachments — 添付ファイルのアップロード。
///
/// ファイルを持つ全フィールドを受信順に1件ずつアップロードし、結果を同じ順で返す。
/// 途中で失敗した場合はそこで中断する（それまでのアップロードは取り消さない）。
pub async fn handle_post_attachments(
    State(state): State<Arc<GatewayState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadedFilesResponse>, GatewayError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_none() {
            continue;
        }
        let buffered = BufferedFile::from_field(field).await?;
        tracing::debug!(index = files.len(), size = buffered.size(), "添付ファイルを受信");
        files.push(buffered.upload(&state, UploadService::PostAttachments).await?);
    }

    Ok(Json(UploadedFilesResponse { files }))
}
