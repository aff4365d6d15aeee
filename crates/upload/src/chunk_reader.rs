//! # チャンクリーダー
//!
//! 読み取り可能なバイトソースを固定サイズのチャンクに分割する。

use tokio::io::{AsyncRead, AsyncReadExt};

/// 既定のチャンクサイズ（8 MiB）
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 23;

/// 固定サイズのバッファでソースを順に読み進めるリーダー。
///
/// `next_chunk` はバッファを満たすまで読み込むため、最後のチャンク以外は
/// 常に `chunk_size` バイトになる。空のチャンクは返さない。
pub struct ChunkReader<R> {
    source: R,
    buf: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// 新しいChunkReaderを作成する。`chunk_size` が0の場合は1として扱う。
    pub fn new(source: R, chunk_size: usize) -> Self {
        Self {
            source,
            buf: vec![0u8; chunk_size.max(1)],
            done: false,
        }
    }

    /// チャンクサイズ
    pub fn chunk_size(&self) -> usize {
        self.buf.len()
    }

    /// 次のチャンクを返す。ソースの終端に達したら `None`。
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<&[u8]>> {
        if self.done {
            return Ok(None);
        }

        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self.source.read(&mut self.buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        Ok(Some(&self.buf[..filled]))
    }
}
