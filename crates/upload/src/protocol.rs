//! # Length-prefixed アップロードプロトコル
//!
//! Gateway ↔ バックエンド間のクライアントストリーミング呼び出しに使う
//! length-prefixedバイナリプロトコル。整数は全てビッグエンディアン。
//!
//! ## クライアント → サーバー
//! ```text
//! [4B: service_len][service]                                         (接続ごとに1回)
//! [1B: 0x01][4B: name_len][name][4B: ct_len][ct][4B: chunk_len][chunk]  (チャンク、繰り返し)
//! [1B: 0x00]                                                         (送信側クローズ)
//! ```
//!
//! ## サーバー → クライアント（1回のみ）
//! ```text
//! [4B: status][4B: body_len][body]
//! ```
//! status 0 のとき body は `[4B: name_len][name][8B: size]`、
//! それ以外は UTF-8 のエラーメッセージ。
//!
//! 終端マーカー `0x00` を受け取る前に接続が切れた場合は中断とみなす。

use socio_types::{UploadRequest, UploadResponse};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::UploadError;

/// チャンクフレームのタグ
pub const TAG_CHUNK: u8 = 0x01;
/// 送信側クローズのタグ
pub const TAG_END_OF_STREAM: u8 = 0x00;

/// 1フィールドあたりの既定上限（100 MiB）
pub const DEFAULT_MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;
/// ファイル名・Content-Typeフィールドの上限
pub const MAX_METADATA_BYTES: usize = 4096;

/// サーバーが受信したフレーム。
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// ファイル本体の一部
    Chunk(UploadRequest),
    /// クライアントが送信を完了した
    EndOfStream,
}

// ─────────────────────────────────────────────
// 読み取り
// ─────────────────────────────────────────────

/// ストリームから4バイトビッグエンディアンのu32を読み取る。
pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// 長さフィールドを読み取り、上限を超えていれば `InvalidData` を返す。
async fn read_len<R: AsyncRead + Unpin>(r: &mut R, max_len: usize) -> std::io::Result<usize> {
    let len = read_u32(r).await? as usize;
    if len > max_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("フレーム長が上限を超えています: {len} bytes (上限: {max_len} bytes)"),
        ));
    }
    Ok(len)
}

/// length-prefixedバイト列を読み取る。
///
/// 申告長ぶんを先に確保せず、実際に届いたバイト数に応じてバッファを伸ばす。
pub async fn read_bytes<R: AsyncRead + Unpin>(
    r: &mut R,
    max_len: usize,
) -> std::io::Result<Vec<u8>> {
    let len = read_len(r, max_len).await?;
    let mut buf = Vec::new();
    let read = (&mut *r).take(len as u64).read_to_end(&mut buf).await?;
    if read < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("フィールドの途中で接続が閉じられました: {read}/{len} bytes"),
        ));
    }
    Ok(buf)
}

/// length-prefixed文字列を読み取る。
pub async fn read_string<R: AsyncRead + Unpin>(
    r: &mut R,
    max_len: usize,
) -> std::io::Result<String> {
    let buf = read_bytes(r, max_len).await?;
    String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// 接続冒頭のサービスパスを読み取る。
pub async fn read_service_header<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<String> {
    // サービスパスは短いので固定の上限で十分
    read_string(r, 1024).await
}

/// 次のフレームを読み取る。
///
/// 終端マーカーより前にEOFに達した場合は `UnexpectedEof` を返す。
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max_frame_bytes: usize,
) -> std::io::Result<Frame> {
    let mut tag = [0u8; 1];
    if r.read(&mut tag).await? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "終端マーカーを受信する前に接続が閉じられました",
        ));
    }

    match tag[0] {
        TAG_END_OF_STREAM => Ok(Frame::EndOfStream),
        TAG_CHUNK => {
            let meta_max = max_frame_bytes.min(MAX_METADATA_BYTES);
            let file_name = read_string(r, meta_max).await?;
            let content_type = read_string(r, meta_max).await?;
            let chunk = read_bytes(r, max_frame_bytes).await?;
            Ok(Frame::Chunk(UploadRequest {
                file_name,
                chunk,
                content_type,
            }))
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("未知のフレームタグ: 0x{other:02x}"),
        )),
    }
}

/// サーバーのレスポンスを読み取る: [4B: status][4B: body_len][body]
pub async fn read_response<R: AsyncRead + Unpin>(
    r: &mut R,
    max_len: usize,
) -> std::io::Result<(u32, Vec<u8>)> {
    let status = read_u32(r).await?;
    let body = read_bytes(r, max_len).await?;
    Ok((status, body))
}

// ─────────────────────────────────────────────
// 書き込み
// ─────────────────────────────────────────────

async fn write_field<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    w.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    w.write_all(bytes).await
}

/// 接続冒頭のサービスパスを書き込む。
pub async fn write_service_header<W: AsyncWrite + Unpin>(
    w: &mut W,
    service: &str,
) -> std::io::Result<()> {
    write_field(w, service.as_bytes()).await
}

/// チャンクフレームを書き込む。
pub async fn write_chunk_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    req: &UploadRequest,
) -> std::io::Result<()> {
    w.write_all(&[TAG_CHUNK]).await?;
    write_field(w, req.file_name.as_bytes()).await?;
    write_field(w, req.content_type.as_bytes()).await?;
    write_field(w, &req.chunk).await
}

/// 終端マーカーを書き込み、フラッシュする。
pub async fn write_end_of_stream<W: AsyncWrite + Unpin>(w: &mut W) -> std::io::Result<()> {
    w.write_all(&[TAG_END_OF_STREAM]).await?;
    w.flush().await
}

/// レスポンスを書き込む: [4B: status][4B: body_len][body]
pub async fn write_response<W: AsyncWrite + Unpin>(
    w: &mut W,
    status: u32,
    body: &[u8],
) -> std::io::Result<()> {
    w.write_all(&status.to_be_bytes()).await?;
    write_field(w, body).await?;
    w.flush().await?;
    Ok(())
}

// ─────────────────────────────────────────────
// レスポンスボディ
// ─────────────────────────────────────────────

/// 成功レスポンスのボディを組み立てる: [4B: name_len][name][8B: size]
pub fn encode_upload_response(res: &UploadResponse) -> Vec<u8> {
    let name = res.file_name.as_bytes();
    let mut body = Vec::with_capacity(4 + name.len() + 8);
    body.extend_from_slice(&(name.len() as u32).to_be_bytes());
    body.extend_from_slice(name);
    body.extend_from_slice(&res.size.to_be_bytes());
    body
}

/// 成功レスポンスのボディを解釈する。
pub fn decode_upload_response(body: &[u8]) -> Result<UploadResponse, UploadError> {
    let truncated = || UploadError::Protocol("レスポンスボディが短すぎます".to_string());

    let (len_bytes, rest) = body.split_first_chunk::<4>().ok_or_else(truncated)?;
    let name_len = u32::from_be_bytes(*len_bytes) as usize;
    if rest.len() != name_len + 8 {
        return Err(UploadError::Protocol(format!(
            "レスポンスボディ長が不正: {} bytes",
            body.len()
        )));
    }
    let (name, size_bytes) = rest.split_at(name_len);
    let file_name = String::from_utf8(name.to_vec())
        .map_err(|e| UploadError::Protocol(format!("ファイル名がUTF-8ではありません: {e}")))?;
    let size_arr: [u8; 8] = size_bytes.try_into().map_err(|_| truncated())?;

    Ok(UploadResponse {
        file_name,
        size: u64::from_be_bytes(size_arr),
    })
}

/// 読み書き中のI/Oエラーをアップロードエラーに分類する。
///
/// `InvalidData` はフレーム不正、それ以外は通信障害として扱う。
pub fn classify_io_error(e: std::io::Error) -> UploadError {
    match e.kind() {
        std::io::ErrorKind::InvalidData => UploadError::Protocol(e.to_string()),
        _ => UploadError::Transport(e.to_string()),
    }
}
