//! # S3互換 ArtifactStore 実装
//!
//! AWS S3, MinIO, Cloudflare R2 等のS3互換APIにアーティファクトを保存する。
//! 一時ファイルはストリーミングで送るため、ファイル全体をメモリに載せない。

use std::path::Path;

use super::ArtifactStore;
use crate::error::UploadError;

/// Content-Typeが申告されなかった場合の既定値
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// S3互換ストレージへの接続設定。
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// エンドポイントURL（例: `http://localhost:9000`）
    pub endpoint: String,
    /// アクセスキー
    pub access_key: String,
    /// シークレットキー
    pub secret_key: String,
    /// リージョン。`None` の場合はエンドポイントから推定する
    pub region: Option<String>,
}

impl S3Settings {
    /// 使用するリージョン名。
    ///
    /// AWS S3エンドポイント（s3.REGION.amazonaws.com）からリージョンを検出し、
    /// 非AWSエンドポイントではus-east-1をフォールバックとして使う。
    pub fn resolved_region(&self) -> String {
        if let Some(region) = &self.region {
            return region.clone();
        }
        self.endpoint
            .find("s3.")
            .and_then(|start| {
                let rest = &self.endpoint[start + 3..];
                rest.find(".amazonaws.com").map(|end| rest[..end].to_string())
            })
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string())
    }

    fn region(&self) -> s3::Region {
        s3::Region::Custom {
            region: self.resolved_region(),
            endpoint: self.endpoint.clone(),
        }
    }

    fn credentials(&self) -> anyhow::Result<s3::creds::Credentials> {
        Ok(s3::creds::Credentials::new(
            Some(self.access_key.as_str()),
            Some(self.secret_key.as_str()),
            None,
            None,
            None,
        )?)
    }
}

/// S3互換バケットを1つ受け持つArtifactStore。
pub struct S3ArtifactStore {
    bucket: s3::Bucket,
}

impl S3ArtifactStore {
    /// 既存のバケットハンドルから構築する。
    pub fn new(bucket: s3::Bucket) -> Self {
        Self { bucket }
    }

    /// バケットに接続する。バケットが存在しなければ作成する。
    pub async fn connect(settings: &S3Settings, bucket_name: &str) -> anyhow::Result<Self> {
        let bucket =
            s3::Bucket::new(bucket_name, settings.region(), settings.credentials()?)?
                .with_path_style();

        if !bucket.exists().await? {
            tracing::info!(bucket = %bucket_name, "バケットが存在しないため作成します");
            let created = s3::Bucket::create_with_path_style(
                bucket_name,
                settings.region(),
                settings.credentials()?,
                s3::BucketConfiguration::default(),
            )
            .await?;
            if !created.success() {
                anyhow::bail!(
                    "バケット作成に失敗: {bucket_name} (HTTP {})",
                    created.response_code
                );
            }
        }

        Ok(Self::new(*bucket))
    }

    /// バケット名
    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn store(
        &self,
        name: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let mut file = tokio::fs::File::open(local_path).await.map_err(|e| {
            UploadError::LocalResource(format!(
                "一時ファイルを開けません ({}): {e}",
                local_path.display()
            ))
        })?;

        let content_type = if content_type.is_empty() {
            FALLBACK_CONTENT_TYPE
        } else {
            content_type
        };

        let response = self
            .bucket
            .put_object_stream_with_content_type(&mut file, name, content_type)
            .await
            .map_err(|e| UploadError::Storage(format!("オブジェクト保存に失敗 ({name}): {e}")))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(UploadError::Storage(format!(
                "オブジェクト保存に失敗 ({name}): HTTP {status}"
            )));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), UploadError> {
        let response = self
            .bucket
            .delete_object(name)
            .await
            .map_err(|e| UploadError::Storage(format!("オブジェクト削除に失敗 ({name}): {e}")))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(UploadError::Storage(format!(
                "オブジェクト削除に失敗 ({name}): HTTP {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: &str, region: Option<&str>) -> S3Settings {
        S3Settings {
            endpoint: endpoint.to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            region: region.map(str::to_string),
        }
    }

    #[test]
    fn test_region_detection() {
        assert_eq!(
            settings("https://s3.ap-northeast-1.amazonaws.com", None).resolved_region(),
            "ap-northeast-1"
        );
        assert_eq!(
            settings("http://localhost:9000", None).resolved_region(),
            "us-east-1"
        );
        assert_eq!(
            settings("http://localhost:9000", Some("ru-central1")).resolved_region(),
            "ru-central1"
        );
    }

    #[test]
    fn test_new_keeps_bucket_name() {
        let s = settings("http://localhost:9000", None);
        let bucket = s3::Bucket::new("user-avatars", s.region(), s.credentials().unwrap())
            .unwrap()
            .with_path_style();
        let store = S3ArtifactStore::new(*bucket);
        assert_eq!(store.bucket_name(), "user-avatars");
    }
}
