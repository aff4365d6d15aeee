//! # アップロードサーバー
//!
//! TCP接続を受け付け、冒頭のサービスパスに応じて登録済みのハンドラへ振り分ける。
//! 1接続 = 1アップロードで、接続ごとに1タスクを起動する。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use socio_types::UploadService;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{status, UploadError};
use crate::protocol;
use crate::server::{FramedUploadStream, UploadEndpoint, DEFAULT_CHUNK_READ_TIMEOUT_SEC};

/// サービスパスごとのハンドラを束ねたサーバー。
pub struct UploadServer {
    endpoints: HashMap<UploadService, Arc<dyn UploadEndpoint>>,
    max_frame_bytes: usize,
    header_timeout: Duration,
}

impl UploadServer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            endpoints: HashMap::new(),
            max_frame_bytes,
            header_timeout: Duration::from_secs(DEFAULT_CHUNK_READ_TIMEOUT_SEC),
        }
    }

    /// 接続後、サービスパスを受信し終えるまでの待ち時間を設定する。
    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// サービスにハンドラを登録する。同じサービスへの再登録は上書き。
    pub fn register(mut self, service: UploadService, endpoint: Arc<dyn UploadEndpoint>) -> Self {
        self.endpoints.insert(service, endpoint);
        self
    }

    /// 登録済みのサービス
    pub fn services(&self) -> Vec<UploadService> {
        let mut services: Vec<_> = self.endpoints.keys().copied().collect();
        services.sort_by_key(|s| s.path());
        services
    }

    /// `shutdown` がキャンセルされるまで接続を受け付ける。
    ///
    /// キャンセル時は処理中のアップロードにも伝搬し、各ハンドラが
    /// 一時アーティファクトを片付けてから終了する。
    pub async fn serve(
        self: Arc<Self>,
        listener: tokio::net::TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("シャットダウン要求を受信、受付を停止します");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "接続受付");
                    let server = self.clone();
                    let cancel = shutdown.child_token();
                    tokio::spawn(async move {
                        server.handle_connection(stream, cancel).await;
                    });
                }
                Err(e) => tracing::error!(error = %e, "acceptエラー"),
            }
        }
    }

    /// 1接続分のアップロードを処理し、結果を1回だけ書き戻す。
    pub async fn handle_connection<T>(&self, io: T, cancel: CancellationToken)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (reader, mut writer) = tokio::io::split(io);
        let mut stream = FramedUploadStream::new(reader, self.max_frame_bytes);

        let result = match self.dispatch(&mut stream, &cancel).await {
            Ok(res) => {
                protocol::write_response(
                    &mut writer,
                    status::OK,
                    &protocol::encode_upload_response(&res),
                )
                .await
            }
            Err(e) => {
                protocol::write_response(&mut writer, e.status_code(), e.to_string().as_bytes())
                    .await
            }
        };

        if let Err(e) = result {
            // クライアントが既に切断している場合は書き戻せない
            tracing::debug!(error = %e, "レスポンス書き込みエラー");
            return;
        }
        let _ = writer.shutdown().await;
    }

    async fn dispatch<R>(
        &self,
        stream: &mut FramedUploadStream<R>,
        cancel: &CancellationToken,
    ) -> Result<socio_types::UploadResponse, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let timeout = self.header_timeout;
        let header =
            tokio::time::timeout(timeout, protocol::read_service_header(stream.reader_mut()));
        let path = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            path = header => {
                path.map_err(|_| UploadError::ChunkReadTimeout {
                    timeout_sec: timeout.as_secs(),
                })?
                .map_err(protocol::classify_io_error)?
            }
        };

        let endpoint = UploadService::from_path(&path)
            .and_then(|service| self.endpoints.get(&service))
            .ok_or_else(|| UploadError::UnknownService(path.clone()))?;

        tracing::debug!(service = %path, "アップロード開始");
        endpoint.upload(stream, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{upload, FramedUploadSink, UploadClient, UploadMetadata};
    use crate::chunk_reader::ChunkReader;
    use crate::naming::UuidNameAllocator;
    use crate::server::{HandlerSettings, UploadHandler};
    use crate::test_support::*;
    use std::time::Duration;

    struct Fixture {
        tmp: tempfile::TempDir,
        attachments: Arc<UploadHandler<MemoryStore, UuidNameAllocator>>,
        avatars: Arc<UploadHandler<MemoryStore, UuidNameAllocator>>,
        server: Arc<UploadServer>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let settings = HandlerSettings {
            temp_dir: tmp.path().to_path_buf(),
            chunk_read_timeout: Duration::from_secs(5),
        };
        let attachments = Arc::new(UploadHandler::new(
            MemoryStore::default(),
            UuidNameAllocator,
            settings.clone(),
        ));
        let avatars = Arc::new(UploadHandler::new(
            MemoryStore::default(),
            UuidNameAllocator,
            settings,
        ));
        let server = Arc::new(
            UploadServer::new(1024)
                .register(UploadService::PostAttachments, attachments.clone())
                .register(UploadService::UserAvatars, avatars.clone()),
        );
        Fixture {
            tmp,
            attachments,
            avatars,
            server,
        }
    }

    /// テスト用サーバーを起動し、アドレスを返す。
    async fn start(server: Arc<UploadServer>) -> (String, CancellationToken) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(listener, shutdown.clone()));
        (addr, shutdown)
    }

    /// インメモリの双方向ストリームでクライアントとサーバーを接続する
    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let fx = fixture();
        let (client_io, server_io) = tokio::io::duplex(64);
        let server = fx.server.clone();
        let task = tokio::spawn(async move {
            server
                .handle_connection(server_io, CancellationToken::new())
                .await
        });

        let mut sink = FramedUploadSink::open(client_io, UploadService::PostAttachments)
            .await
            .unwrap();
        let mut reader = ChunkReader::new(&b"hello world"[..], 6);
        let meta = UploadMetadata::new("note.txt", "text/plain");
        let res = upload(&mut reader, &meta, &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        task.await.unwrap();

        assert_eq!(res.size, 11);
        assert_ne!(res.file_name, "note.txt");
        assert_eq!(
            fx.attachments.store().get(&res.file_name).unwrap(),
            b"hello world"
        );
        assert!(fx.avatars.store().names().is_empty());
        assert_eq!(count_files(fx.tmp.path()), 0);
    }

    /// TCP経由で用途ごとのハンドラに振り分けられる
    #[tokio::test]
    async fn test_tcp_dispatch_by_service() {
        let fx = fixture();
        let (addr, shutdown) = start(fx.server.clone()).await;
        let client = UploadClient::new(addr, 4);

        let res = client
            .upload_file(
                UploadService::UserAvatars,
                &b"png-bytes"[..],
                &UploadMetadata::new("me.png", "image/png"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(res.size, 9);
        assert_eq!(fx.avatars.store().get(&res.file_name).unwrap(), b"png-bytes");
        assert_eq!(
            fx.avatars.store().content_type(&res.file_name).unwrap(),
            "image/png"
        );
        assert!(fx.attachments.store().names().is_empty());
        shutdown.cancel();
    }

    /// 未登録のサービスはNOT_FOUNDで拒否される
    #[tokio::test]
    async fn test_unregistered_service() {
        let fx = fixture();
        let (addr, shutdown) = start(fx.server.clone()).await;
        let client = UploadClient::new(addr, 4);

        let err = client
            .upload_file(
                UploadService::GroupAvatars,
                &b""[..],
                &UploadMetadata::new("g.png", "image/png"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Remote {
                status: status::NOT_FOUND,
                ..
            }
        ));
        assert_eq!(count_files(fx.tmp.path()), 0);
        shutdown.cancel();
    }

    /// 終端マーカーを送らずに切断したクライアントのデータはコミットされない
    #[tokio::test]
    async fn test_aborted_client_is_not_committed() {
        let fx = fixture();
        let (client_io, server_io) = tokio::io::duplex(1024);
        let server = fx.server.clone();
        let task = tokio::spawn(async move {
            server
                .handle_connection(server_io, CancellationToken::new())
                .await
        });

        {
            let mut client_io = client_io;
            protocol::write_service_header(&mut client_io, UploadService::PostAttachments.path())
                .await
                .unwrap();
            protocol::write_chunk_frame(&mut client_io, &request("a.txt", b"partial"))
                .await
                .unwrap();
            // ここでドロップ = 送信側クローズなしの切断
        }
        task.await.unwrap();

        assert!(fx.attachments.store().names().is_empty());
        assert_eq!(count_files(fx.tmp.path()), 0);
    }

    /// フレーム上限を超えるチャンクはINVALID_ARGUMENTで拒否される
    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let fx = fixture();
        let (client_io, server_io) = tokio::io::duplex(8 * 1024);
        let server = fx.server.clone();
        let task = tokio::spawn(async move {
            server
                .handle_connection(server_io, CancellationToken::new())
                .await
        });

        let mut sink = FramedUploadSink::open(client_io, UploadService::PostAttachments)
            .await
            .unwrap();
        let big = vec![7u8; 2048];
        let mut reader = ChunkReader::new(&big[..], 2048);
        let err = upload(
            &mut reader,
            &UploadMetadata::new("big.bin", ""),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        task.await.unwrap();

        assert!(matches!(
            err,
            UploadError::Remote {
                status: status::INVALID_ARGUMENT,
                ..
            } | UploadError::Transport(_)
        ));
        assert!(fx.attachments.store().names().is_empty());
        assert_eq!(count_files(fx.tmp.path()), 0);
    }

    /// シャットダウンで処理中のアップロードがキャンセルされ片付けられる
    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_upload() {
        let fx = fixture();
        let (addr, shutdown) = start(fx.server.clone()).await;

        let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
        protocol::write_service_header(&mut stream, UploadService::UserAvatars.path())
            .await
            .unwrap();
        protocol::write_chunk_frame(&mut stream, &request("me.png", b"half"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        let (status_code, body) = protocol::read_response(&mut stream, 1024).await.unwrap();
        assert_eq!(status_code, status::CANCELLED);
        assert!(!body.is_empty());
        assert!(fx.avatars.store().names().is_empty());
        assert_eq!(count_files(fx.tmp.path()), 0);
    }

    /// サービスパスを送らない接続はタイムアウトで応答を返して閉じられる
    #[tokio::test]
    async fn test_silent_client_times_out_before_header() {
        let fx = fixture();
        let server = Arc::new(
            UploadServer::new(1024)
                .with_header_timeout(Duration::from_millis(50))
                .register(UploadService::PostAttachments, fx.attachments.clone()),
        );
        let (addr, shutdown) = start(server).await;

        let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
        // 長さプレフィックスの途中まで
        stream.write_all(&[0, 0]).await.unwrap();

        let (status_code, body) = tokio::time::timeout(
            Duration::from_secs(2),
            protocol::read_response(&mut stream, 1024),
        )
        .await
        .expect("server did not answer a silent client")
        .unwrap();
        assert_eq!(status_code, status::DEADLINE_EXCEEDED);
        assert!(!body.is_empty());
        assert_eq!(count_files(fx.tmp.path()), 0);
        shutdown.cancel();
    }

    #[test]
    fn test_registered_services() {
        let fx = fixture();
        assert_eq!(
            fx.server.services(),
            vec![UploadService::PostAttachments, UploadService::UserAvatars]
        );
    }
}
