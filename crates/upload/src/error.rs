//! # アップロード エラー型
//!
//! クライアント・サーバー共通のエラー型と、ワイヤ上のステータスコード。

/// ワイヤ上で使うステータスコード。番号はRPCステータスの慣例に合わせる。
pub mod status {
    /// 成功
    pub const OK: u32 = 0;
    /// キャンセル
    pub const CANCELLED: u32 = 1;
    /// 不正なストリーム
    pub const INVALID_ARGUMENT: u32 = 3;
    /// 受信タイムアウト
    pub const DEADLINE_EXCEEDED: u32 = 4;
    /// 未知のサービス
    pub const NOT_FOUND: u32 = 5;
    /// サーバー内部エラー
    pub const INTERNAL: u32 = 13;
    /// 通信・ストレージ障害
    pub const UNAVAILABLE: u32 = 14;
}

/// アップロードエラー型。
///
/// どのエラーもアップロード全体を中断する。部分的な成功状態は存在しない。
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// ストリームの送受信に失敗（切断・終端マーカーなしの終了を含む）
    #[error("ストリーム通信に失敗: {0}")]
    Transport(String),
    /// フレームが不正
    #[error("不正なストリーム: {0}")]
    Protocol(String),
    /// 登録されていないサービスパス
    #[error("未知のサービス: {0}")]
    UnknownService(String),
    /// 一時ファイル・入力ファイルの操作に失敗
    #[error("ローカルファイル操作に失敗: {0}")]
    LocalResource(String),
    /// ArtifactStoreへのコミットに失敗
    #[error("ストレージ操作に失敗: {0}")]
    Storage(String),
    /// チャンク単位の受信タイムアウト
    #[error("チャンク受信がタイムアウトしました ({timeout_sec}秒)")]
    ChunkReadTimeout {
        /// 設定されたタイムアウト（秒）
        timeout_sec: u64,
    },
    /// 呼び出し元によるキャンセル
    #[error("アップロードがキャンセルされました")]
    Cancelled,
    /// サーバーがエラーステータスを返した
    #[error("サーバーがエラーを返しました: status={status}, {message}")]
    Remote {
        /// ワイヤ上のステータスコード
        status: u32,
        /// サーバー側のエラーメッセージ
        message: String,
    },
}

impl UploadError {
    /// ワイヤに載せるステータスコード。
    pub fn status_code(&self) -> u32 {
        match self {
            UploadError::Transport(_) | UploadError::Storage(_) => status::UNAVAILABLE,
            UploadError::Protocol(_) => status::INVALID_ARGUMENT,
            UploadError::UnknownService(_) => status::NOT_FOUND,
            UploadError::LocalResource(_) => status::INTERNAL,
            UploadError::ChunkReadTimeout { .. } => status::DEADLINE_EXCEEDED,
            UploadError::Cancelled => status::CANCELLED,
            UploadError::Remote { status, .. } => *status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            UploadError::Storage("down".into()).status_code(),
            status::UNAVAILABLE
        );
        assert_eq!(
            UploadError::ChunkReadTimeout { timeout_sec: 30 }.status_code(),
            status::DEADLINE_EXCEEDED
        );
        assert_eq!(
            UploadError::Remote {
                status: status::INVALID_ARGUMENT,
                message: "x".into()
            }
            .status_code(),
            status::INVALID_ARGUMENT
        );
    }
}
