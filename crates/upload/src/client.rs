//! # アップロードストリームのクライアント
//!
//! ローカルに確定済みのファイルをチャンクに分けて送信し、
//! サーバーからの最終応答を1回だけ受け取る。

use socio_types::{UploadRequest, UploadResponse, UploadService};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::chunk_reader::ChunkReader;
use crate::error::{status, UploadError};
use crate::protocol;

/// サーバー応答ボディの上限
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// 送信側のストリーム。
#[async_trait::async_trait]
pub trait UploadSink: Send {
    /// チャンクメッセージを1つ送る。
    async fn send(&mut self, req: &UploadRequest) -> Result<(), UploadError>;

    /// 送信側を閉じ、サーバーの最終応答を待つ。
    async fn close_and_recv(&mut self) -> Result<UploadResponse, UploadError>;
}

/// length-prefixedフレームを書き込む送信ストリーム。
pub struct FramedUploadSink<T> {
    io: T,
}

impl FramedUploadSink<tokio::net::TcpStream> {
    /// バックエンドに接続してストリームを開く。
    pub async fn connect(addr: &str, service: UploadService) -> Result<Self, UploadError> {
        let io = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| UploadError::Transport(format!("接続に失敗 ({addr}): {e}")))?;
        Self::open(io, service).await
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> FramedUploadSink<T> {
    /// 既存の接続上でストリームを開く。
    pub async fn open(mut io: T, service: UploadService) -> Result<Self, UploadError> {
        protocol::write_service_header(&mut io, service.path())
            .await
            .map_err(|e| UploadError::Transport(format!("ストリーム開始に失敗: {e}")))?;
        Ok(Self { io })
    }
}

#[async_trait::async_trait]
impl<T: AsyncRead + AsyncWrite + Unpin + Send> UploadSink for FramedUploadSink<T> {
    async fn send(&mut self, req: &UploadRequest) -> Result<(), UploadError> {
        protocol::write_chunk_frame(&mut self.io, req)
            .await
            .map_err(|e| UploadError::Transport(format!("チャンク送信に失敗: {e}")))
    }

    async fn close_and_recv(&mut self) -> Result<UploadResponse, UploadError> {
        protocol::write_end_of_stream(&mut self.io)
            .await
            .map_err(|e| UploadError::Transport(format!("送信側クローズに失敗: {e}")))?;

        let (code, body) = protocol::read_response(&mut self.io, MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| UploadError::Transport(format!("応答の受信に失敗: {e}")))?;

        if code != status::OK {
            return Err(UploadError::Remote {
                status: code,
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        protocol::decode_upload_response(&body)
    }
}

/// 送信するファイルのメタデータ。
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    /// 元のファイル名
    pub file_name: String,
    /// 申告されたMIMEタイプ
    pub content_type: String,
}

impl UploadMetadata {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }
}

/// `reader` を最後まで読み、チャンクとして `sink` に送って最終応答を受け取る。
///
/// 読み取りエラー・送信エラー・キャンセルでは直ちに中断し、送信側クローズは
/// 行わない（サーバーは終端マーカーのない切断としてアップロードを破棄する）。
pub async fn upload<R, K>(
    reader: &mut ChunkReader<R>,
    meta: &UploadMetadata,
    sink: &mut K,
    cancel: &CancellationToken,
) -> Result<UploadResponse, UploadError>
where
    R: AsyncRead + Unpin + Send,
    K: UploadSink + ?Sized,
{
    let mut chunks = 0usize;
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            read = reader.next_chunk() => read,
        };
        let req = match read {
            Ok(Some(chunk)) => UploadRequest {
                file_name: meta.file_name.clone(),
                chunk: chunk.to_vec(),
                content_type: meta.content_type.clone(),
            },
            Ok(None) => break,
            Err(e) => {
                return Err(UploadError::LocalResource(format!(
                    "アップロード元の読み取りに失敗: {e}"
                )))
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            sent = sink.send(&req) => sent?,
        }
        chunks += 1;
    }

    tracing::debug!(chunks, file_name = %meta.file_name, "全チャンク送信完了");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        res = sink.close_and_recv() => res,
    }
}

/// バックエンドのアドレスとチャンクサイズを保持するクライアント。
#[derive(Debug, Clone)]
pub struct UploadClient {
    addr: String,
    chunk_size: usize,
}

impl UploadClient {
    pub fn new(addr: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            addr: addr.into(),
            chunk_size,
        }
    }

    /// `source` を指定サービスにアップロードする。
    pub async fn upload_file<R>(
        &self,
        service: UploadService,
        source: R,
        meta: &UploadMetadata,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut sink = FramedUploadSink::connect(&self.addr, service).await?;
        let mut reader = ChunkReader::new(source, self.chunk_size);
        upload(&mut reader, meta, &mut sink, cancel).await
    }
}
