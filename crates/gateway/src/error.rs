//! # Gateway エラー型

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use socio_upload::error::status;
use socio_upload::UploadError;

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
    /// multipartの読み取りに失敗
    #[error("multipartの読み取りに失敗: {0}")]
    Multipart(#[from] MultipartError),
    /// バックエンドへのアップロードに失敗
    #[error("アップロードに失敗: {0}")]
    Upload(#[from] UploadError),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Multipart(e) => e.status(),
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upload(e) => match e {
                UploadError::Remote { status: code, .. } => match *code {
                    status::INVALID_ARGUMENT | status::CANCELLED => StatusCode::BAD_REQUEST,
                    status::DEADLINE_EXCEEDED => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                },
                UploadError::ChunkReadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                UploadError::LocalResource(_) => StatusCode::INTERNAL_SERVER_ERROR,
                // Gateway自身のシャットダウン
                UploadError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "リクエスト処理に失敗");
        } else {
            tracing::warn!(error = %self, %status, "リクエストを拒否");
        }
        (status, self.to_string()).into_response()
    }
}
