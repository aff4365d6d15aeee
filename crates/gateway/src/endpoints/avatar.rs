//! # POST /profile/avatar, POST /groups/avatar
//!
//! ユーザー・グループのアバター画像のアップロード。

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use socio_types::{UploadResponse, UploadService};

use super::BufferedFile;
use crate::config::GatewayState;
use crate::error::GatewayError;

/// アバター画像のmultipartフィールド名
pub const AVATAR_FIELD: &str = "avatar";

/// POST /profile/avatar — ユーザーアバターのアップロード。
pub async fn handle_profile_avatar(
    State(state): State<Arc<GatewayState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    upload_avatar(&state, multipart, UploadService::UserAvatars)
        .await
        .map(Json)
}

/// POST /groups/avatar — グループアバターのアップロード。
pub async fn handle_group_avatar(
    State(state): State<Arc<GatewayState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    upload_avatar(&state, multipart, UploadService::GroupAvatars)
        .await
        .map(Json)
}

/// 最初の `avatar` フィールドだけをアップロードする。
async fn upload_avatar(
    state: &GatewayState,
    mut multipart: Multipart,
    service: UploadService,
) -> Result<UploadResponse, GatewayError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(AVATAR_FIELD) {
            continue;
        }
        let buffered = BufferedFile::from_field(field).await?;
        tracing::debug!(%service, size = buffered.size(), "アバター画像を受信");
        return buffered.upload(state, service).await;
    }

    Err(GatewayError::BadRequest(format!(
        "`{AVATAR_FIELD}` フィールドがありません"
    )))
}
