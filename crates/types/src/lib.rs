//! # Socio アップロード共有型定義
//!
//! Gateway とバックエンドの間でやり取りされるアップロードストリームの
//! メッセージ、およびGatewayがHTTPクライアントに返すレスポンスの型。
//!
//! ## 用途ごとのサービス
//! - 投稿の添付ファイル: `post.Post/Upload`
//! - ユーザーアバター: `user.User/Upload`
//! - グループアバター: `public_group.PublicGroup/Upload`

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ストリームメッセージ
// ---------------------------------------------------------------------------

/// クライアントストリーミングで繰り返し送られるチャンクメッセージ。
///
/// 全メッセージが同じ `file_name` / `content_type` を持つが、
/// サーバーが採用するのは最初の空でない値のみ。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// クライアントが申告した元のファイル名（拡張子のヒントとしてのみ使用）
    pub file_name: String,
    /// ファイル本体の一部
    #[serde(with = "serde_bytes")]
    pub chunk: Vec<u8>,
    /// クライアントが申告したMIMEタイプ
    pub content_type: String,
}

/// ストリーム終了時にサーバーが一度だけ返す応答。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// サーバーが割り当てた外部名（クライアントのファイル名ではない）
    pub file_name: String,
    /// サーバーが受信した累計バイト数
    pub size: u64,
}

/// 複数の添付ファイルをまとめて返すGatewayレスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFilesResponse {
    /// multipartのフィールド順に並んだアップロード結果
    pub files: Vec<UploadResponse>,
}

// ---------------------------------------------------------------------------
// サービス識別
// ---------------------------------------------------------------------------

/// アップロードストリームの用途。用途ごとに保存先が独立する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadService {
    /// 投稿の添付ファイル
    PostAttachments,
    /// ユーザーアバター
    UserAvatars,
    /// グループアバター
    GroupAvatars,
}

impl UploadService {
    /// 全サービス。
    pub const ALL: [UploadService; 3] = [
        UploadService::PostAttachments,
        UploadService::UserAvatars,
        UploadService::GroupAvatars,
    ];

    /// ストリーム開始時に送られるサービスパス。
    pub fn path(self) -> &'static str {
        match self {
            UploadService::PostAttachments => "post.Post/Upload",
            UploadService::UserAvatars => "user.User/Upload",
            UploadService::GroupAvatars => "public_group.PublicGroup/Upload",
        }
    }

    /// サービスパスから用途を引く。未知のパスは `None`。
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.path() == path)
    }
}

impl std::fmt::Display for UploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}
