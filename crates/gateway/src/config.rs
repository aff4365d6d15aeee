//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。

use anyhow::Context;
use socio_upload::{UploadClient, DEFAULT_CHUNK_SIZE};
use tokio_util::sync::CancellationToken;

/// multipartリクエスト全体の既定上限（1000 MiB）
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 1000 << 20;

/// Gatewayの設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// HTTPの待受アドレス
    pub listen_addr: String,
    /// アップロードバックエンドのアドレス
    pub backend_addr: String,
    /// バックエンドへ送るチャンクのサイズ
    pub chunk_size: usize,
    /// リクエストボディの上限
    pub max_upload_size: usize,
}

impl GatewayConfig {
    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let chunk_size = var("UPLOAD_CHUNK_SIZE", &DEFAULT_CHUNK_SIZE.to_string())
            .parse::<usize>()
            .context("UPLOAD_CHUNK_SIZEは整数である必要があります")?;
        if chunk_size == 0 {
            anyhow::bail!("UPLOAD_CHUNK_SIZEは1以上である必要があります");
        }
        let max_upload_size = var("MAX_UPLOAD_SIZE", &DEFAULT_MAX_UPLOAD_SIZE.to_string())
            .parse::<usize>()
            .context("MAX_UPLOAD_SIZEは整数である必要があります")?;

        Ok(Self {
            listen_addr: var("GATEWAY_LISTEN_ADDR", "0.0.0.0:3000"),
            backend_addr: var("UPLOAD_BACKEND_ADDR", "127.0.0.1:50051"),
            chunk_size,
            max_upload_size,
        })
    }
}

/// Gatewayの共有状態。
pub struct GatewayState {
    /// バックエンドへのアップロードクライアント
    pub upload_client: UploadClient,
    /// シャットダウン時にキャンセルされるルートトークン
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig, shutdown: CancellationToken) -> Self {
        Self {
            upload_client: UploadClient::new(config.backend_addr.clone(), config.chunk_size),
            shutdown,
        }
    }
}
