//! # アップロードストリームのサーバー側ハンドラ
//!
//! 受信したチャンクを順に一時アーティファクトへ書き込み、ストリーム終了時に
//! ArtifactStoreへコミットする。
//!
//! ## 状態遷移
//! ```text
//! AwaitingFirstChunk → Receiving → Finalizing → { Committed, Failed }
//! ```
//! どの状態から抜けても一時アーティファクトは閉じて削除される。

use std::path::PathBuf;
use std::time::Duration;

use socio_types::{UploadRequest, UploadResponse};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::artifact::TemporaryArtifact;
use crate::error::UploadError;
use crate::naming::NameAllocator;
use crate::protocol::{self, Frame};
use crate::storage::ArtifactStore;

/// チャンク受信タイムアウトの既定値（秒）
pub const DEFAULT_CHUNK_READ_TIMEOUT_SEC: u64 = 30;

// ---------------------------------------------------------------------------
// 受信ストリーム
// ---------------------------------------------------------------------------

/// サーバーから見たクライアントストリーム。
#[async_trait::async_trait]
pub trait UploadStream: Send {
    /// 次のメッセージを受信する。正常終了なら `None`。
    async fn recv(&mut self) -> Result<Option<UploadRequest>, UploadError>;
}

/// length-prefixedフレームを読むストリーム実装。
pub struct FramedUploadStream<R> {
    reader: R,
    max_frame_bytes: usize,
    finished: bool,
}

impl<R> FramedUploadStream<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
            finished: false,
        }
    }

    /// フレーム以前のヘッダを読むための内部リーダー
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send> UploadStream for FramedUploadStream<R> {
    async fn recv(&mut self) -> Result<Option<UploadRequest>, UploadError> {
        if self.finished {
            return Ok(None);
        }
        match protocol::read_frame(&mut self.reader, self.max_frame_bytes)
            .await
            .map_err(protocol::classify_io_error)?
        {
            Frame::Chunk(req) => Ok(Some(req)),
            Frame::EndOfStream => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ハンドラ
// ---------------------------------------------------------------------------

/// ハンドラの動作設定。
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// 一時アーティファクトを作成するディレクトリ
    pub temp_dir: PathBuf,
    /// 1チャンクあたりの受信タイムアウト
    pub chunk_read_timeout: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            chunk_read_timeout: Duration::from_secs(DEFAULT_CHUNK_READ_TIMEOUT_SEC),
        }
    }
}

/// アップロード処理の状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    /// 一時アーティファクト作成前
    AwaitingFirstChunk,
    /// チャンク受信中
    Receiving,
    /// ストリーム終了後、コミット中
    Finalizing,
    /// コミット完了
    Committed,
    /// 失敗
    Failed,
}

/// 最初のメッセージで確定するメタデータ。
///
/// 空文字列は未設定として扱い、最初の空でない値だけを採用する。
#[derive(Debug, Default)]
struct CapturedMetadata {
    file_name: String,
    content_type: String,
}

impl CapturedMetadata {
    fn capture(&mut self, req: &UploadRequest) {
        if self.file_name.is_empty() {
            self.file_name.clone_from(&req.file_name);
        }
        if self.content_type.is_empty() {
            self.content_type.clone_from(&req.content_type);
        }
    }
}

/// 用途ごとのアップロードハンドラ。
///
/// ArtifactStoreとNameAllocatorの組み合わせで、添付ファイル・ユーザーアバター・
/// グループアバターの各サービスを構成する。
pub struct UploadHandler<S, A> {
    store: S,
    allocator: A,
    settings: HandlerSettings,
}

impl<S: ArtifactStore, A: NameAllocator> UploadHandler<S, A> {
    pub fn new(store: S, allocator: A, settings: HandlerSettings) -> Self {
        Self {
            store,
            allocator,
            settings,
        }
    }

    /// 保存先
    pub fn store(&self) -> &S {
        &self.store
    }

    /// ストリームを最後まで受信してコミットする。
    ///
    /// 成功した場合のみ割り当て名と累計サイズを返す。どの経路で抜けても
    /// 一時アーティファクトは削除される。
    pub async fn handle(
        &self,
        stream: &mut (dyn UploadStream + '_),
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadError> {
        let mut phase = UploadPhase::AwaitingFirstChunk;

        let mut artifact = match TemporaryArtifact::create(&self.settings.temp_dir).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(error = %e, ?phase, "一時アーティファクトを作成できません");
                return Err(e);
            }
        };
        let upload_id = artifact.id();

        let result = self
            .receive_and_commit(&mut artifact, stream, cancel, &mut phase)
            .await;
        if result.is_err() {
            phase = UploadPhase::Failed;
        }

        let artifact_path = artifact.path().to_path_buf();
        if let Err(e) = artifact.remove().await {
            // コミット済みのアーティファクトは巻き戻さない
            tracing::warn!(
                %upload_id,
                path = %artifact_path.display(),
                error = %e,
                "一時アーティファクトの削除に失敗"
            );
        }

        match &result {
            Ok(res) => tracing::info!(
                %upload_id,
                allocated = %res.file_name,
                size = res.size,
                "アップロード完了"
            ),
            Err(e) => tracing::warn!(%upload_id, ?phase, error = %e, "アップロード失敗"),
        }
        result
    }

    async fn receive_and_commit(
        &self,
        artifact: &mut TemporaryArtifact,
        stream: &mut (dyn UploadStream + '_),
        cancel: &CancellationToken,
        phase: &mut UploadPhase,
    ) -> Result<UploadResponse, UploadError> {
        let upload_id = artifact.id();
        *phase = UploadPhase::Receiving;
        tracing::debug!(%upload_id, ?phase, "受信開始");

        let mut meta = CapturedMetadata::default();
        let mut size: u64 = 0;

        // 受信結果を先に検査し、その後でメタデータを採用する
        while let Some(req) = self.recv_next(stream, cancel).await? {
            meta.capture(&req);
            artifact.append(&req.chunk).await?;
            size += req.chunk.len() as u64;
        }
        artifact.close().await?;

        *phase = UploadPhase::Finalizing;
        tracing::debug!(%upload_id, ?phase, size, "受信完了");

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let allocated = self.allocator.allocate(&meta.file_name);
        let committed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            r = self.store.store(&allocated, artifact.path(), &meta.content_type) => r,
        };
        committed?;

        *phase = UploadPhase::Committed;
        Ok(UploadResponse {
            file_name: allocated,
            size,
        })
    }

    /// キャンセルとチャンク受信タイムアウトを考慮して次のメッセージを受信する。
    async fn recv_next(
        &self,
        stream: &mut (dyn UploadStream + '_),
        cancel: &CancellationToken,
    ) -> Result<Option<UploadRequest>, UploadError> {
        let timeout = self.settings.chunk_read_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            r = tokio::time::timeout(timeout, stream.recv()) => {
                r.map_err(|_| UploadError::ChunkReadTimeout {
                    timeout_sec: timeout.as_secs(),
                })?
            }
        }
    }
}

/// サービスレジストリに登録するためのオブジェクト安全なインターフェース。
#[async_trait::async_trait]
pub trait UploadEndpoint: Send + Sync {
    async fn upload(
        &self,
        stream: &mut (dyn UploadStream + '_),
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadError>;
}

#[async_trait::async_trait]
impl<S: ArtifactStore, A: NameAllocator> UploadEndpoint for UploadHandler<S, A> {
    async fn upload(
        &self,
        stream: &mut (dyn UploadStream + '_),
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadError> {
        self.handle(stream, cancel).await
    }
}
