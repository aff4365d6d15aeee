//! # バックエンド設定
//!
//! 環境変数からの設定読み込み。起動時に一度だけ読み、各コンポーネントの
//! 構築時に明示的に渡す。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use socio_types::UploadService;
use socio_upload::protocol::DEFAULT_MAX_FRAME_BYTES;
use socio_upload::server::DEFAULT_CHUNK_READ_TIMEOUT_SEC;
#[cfg(feature = "vendor-aws")]
use socio_upload::storage::S3Settings;

/// アーティファクトの保存先。
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// ローカルディレクトリ（`{dir}/{bucket}/{name}`）
    Local {
        /// 格納ディレクトリのルート
        dir: PathBuf,
    },
    /// S3互換ストレージ
    #[cfg(feature = "vendor-aws")]
    S3(S3Settings),
}

/// 用途ごとのバケット名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    pub post_attachments: String,
    pub user_avatars: String,
    pub group_avatars: String,
}

impl Buckets {
    /// サービスに対応するバケット名
    pub fn for_service(&self, service: UploadService) -> &str {
        match service {
            UploadService::PostAttachments => &self.post_attachments,
            UploadService::UserAvatars => &self.user_avatars,
            UploadService::GroupAvatars => &self.group_avatars,
        }
    }
}

/// バックエンドの設定。
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// アップロードサーバーの待受アドレス
    pub listen_addr: String,
    /// 一時アーティファクトのディレクトリ
    pub temp_dir: PathBuf,
    /// 1フィールドあたりのフレーム上限
    pub max_frame_bytes: usize,
    /// チャンク単位の受信タイムアウト
    pub chunk_read_timeout: Duration,
    /// 保存先
    pub storage: StorageConfig,
    /// 用途ごとのバケット名
    pub buckets: Buckets,
}

impl BackendConfig {
    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から構築する。未設定の項目は既定値を使う。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let max_frame_bytes = var("UPLOAD_MAX_FRAME_BYTES", &DEFAULT_MAX_FRAME_BYTES.to_string())
            .parse::<usize>()
            .context("UPLOAD_MAX_FRAME_BYTESは整数である必要があります")?;
        let chunk_read_timeout_sec = var(
            "UPLOAD_CHUNK_READ_TIMEOUT_SEC",
            &DEFAULT_CHUNK_READ_TIMEOUT_SEC.to_string(),
        )
        .parse::<u64>()
        .context("UPLOAD_CHUNK_READ_TIMEOUT_SECは整数である必要があります")?;

        let temp_dir = lookup("UPLOAD_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let storage = match var("STORAGE_MODE", "s3").as_str() {
            "local" => StorageConfig::Local {
                dir: PathBuf::from(var("LOCAL_STORAGE_DIR", "./static")),
            },
            #[cfg(feature = "vendor-aws")]
            "s3" => StorageConfig::S3(S3Settings {
                endpoint: var("S3_ENDPOINT", "http://localhost:9000"),
                access_key: var("S3_ACCESS_KEY", "minioadmin"),
                secret_key: var("S3_SECRET_KEY", "minioadmin"),
                region: lookup("S3_REGION"),
            }),
            other => anyhow::bail!("未対応のSTORAGE_MODEです: {other}"),
        };

        Ok(Self {
            listen_addr: var("UPLOAD_LISTEN_ADDR", "0.0.0.0:50051"),
            temp_dir,
            max_frame_bytes,
            chunk_read_timeout: Duration::from_secs(chunk_read_timeout_sec),
            storage,
            buckets: Buckets {
                post_attachments: var("POST_ATTACHMENTS_BUCKET", "post-attachments"),
                user_avatars: var("USER_AVATARS_BUCKET", "user-avatars"),
                group_avatars: var("GROUP_AVATARS_BUCKET", "group-avatars"),
            },
        })
    }
}
