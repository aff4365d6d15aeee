//! # Socio アップロードバックエンド
//!
//! 3つのアップロードサービスを1つの待受アドレスで提供する。
//!
//! ## サービス
//! - `post.Post/Upload` — 投稿の添付ファイル
//! - `user.User/Upload` — ユーザーアバター
//! - `public_group.PublicGroup/Upload` — グループアバター
//!
//! 各サービスは同じハンドラ実装を共有し、保存先のバケットだけが異なる。

mod config;

use std::sync::Arc;

use socio_types::UploadService;
use socio_upload::storage::ArtifactStore;
use socio_upload::{
    HandlerSettings, LocalArtifactStore, UploadHandler, UploadServer, UuidNameAllocator,
};
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, StorageConfig};

/// サービスに対応する保存先を構築する。
async fn build_store(
    config: &BackendConfig,
    service: UploadService,
) -> anyhow::Result<Arc<dyn ArtifactStore>> {
    let bucket = config.buckets.for_service(service);
    let store: Arc<dyn ArtifactStore> = match &config.storage {
        StorageConfig::Local { dir } => {
            let root = dir.join(bucket);
            tracing::info!(%service, root = %root.display(), "ローカルストレージを使用");
            Arc::new(LocalArtifactStore::new(root))
        }
        #[cfg(feature = "vendor-aws")]
        StorageConfig::S3(settings) => {
            let store = socio_upload::storage::S3ArtifactStore::connect(settings, bucket).await?;
            tracing::info!(%service, bucket = %store.bucket_name(), "S3バケットを使用");
            Arc::new(store)
        }
    };
    Ok(store)
}

/// 全サービスを登録したサーバーを構築する。
async fn build_server(config: &BackendConfig) -> anyhow::Result<UploadServer> {
    tokio::fs::create_dir_all(&config.temp_dir).await?;

    let settings = HandlerSettings {
        temp_dir: config.temp_dir.clone(),
        chunk_read_timeout: config.chunk_read_timeout,
    };

    let mut server =
        UploadServer::new(config.max_frame_bytes).with_header_timeout(config.chunk_read_timeout);
    for service in UploadService::ALL {
        let store = build_store(config, service).await?;
        let handler = UploadHandler::new(store, UuidNameAllocator, settings.clone());
        server = server.register(service, Arc::new(handler));
    }
    Ok(server)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = BackendConfig::from_env()?;
    let server = Arc::new(build_server(&config).await?);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "シグナル待機に失敗");
                return;
            }
            shutdown.cancel();
        });
    }

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(
        addr = %config.listen_addr,
        temp_dir = %config.temp_dir.display(),
        max_frame_bytes = config.max_frame_bytes,
        "アップロードバックエンドを起動します"
    );

    server.serve(listener, shutdown).await?;
    Ok(())
}
