//! # Socio Upload Gateway
//!
//! HTTPのmultipartアップロードを受け付け、チャンクアップロードストリームとして
//! バックエンドへ中継する。
//!
//! ## API エンドポイント
//! - `POST /posts/attachments` — 投稿の添付ファイル（複数可）
//! - `POST /profile/avatar` — ユーザーアバター
//! - `POST /groups/avatar` — グループアバター

mod config;
mod endpoints;
mod error;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, GatewayState};
use crate::endpoints::{handle_group_avatar, handle_post_attachments, handle_profile_avatar};

fn router(state: Arc<GatewayState>, max_upload_size: usize) -> axum::Router {
    axum::Router::new()
        .route("/posts/attachments", post(handle_post_attachments))
        .route("/profile/avatar", post(handle_profile_avatar))
        .route("/groups/avatar", post(handle_group_avatar))
        .layer(DefaultBodyLimit::max(max_upload_size))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env()?;
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "シグナル待機に失敗");
                return;
            }
            tracing::info!("シャットダウン要求を受信");
            shutdown.cancel();
        });
    }

    let state = Arc::new(GatewayState::new(&config, shutdown.clone()));
    let app = router(state, config.max_upload_size);

    tracing::info!(
        addr = %config.listen_addr,
        backend = %config.backend_addr,
        chunk_size = config.chunk_size,
        max_upload_size = config.max_upload_size,
        "Gatewayを起動します"
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// テスト
// ---------------------------------------------------------------------------
