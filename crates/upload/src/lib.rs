//! # Socio チャンクアップロード
//!
//! 投稿の添付ファイル・ユーザーアバター・グループアバターで共通に使う
//! クライアントストリーミングのアップロードプロトコル。
//!
//! ## 流れ
//! 1. Gatewayがmultipartのファイルをローカルに確定させる
//! 2. `ChunkReader` がファイルを固定サイズのチャンクに分ける
//! 3. `client::upload` がチャンクを順に送り、送信側を閉じて最終応答を待つ
//! 4. `UploadHandler` がチャンクを一時アーティファクトに組み立てる
//! 5. ストリーム終了時に `NameAllocator` の割り当て名で `ArtifactStore` にコミット
//! 6. 一時アーティファクトを削除し、割り当て名と累計サイズを返す

pub mod artifact;
pub mod chunk_reader;
pub mod client;
pub mod error;
pub mod naming;
pub mod protocol;
pub mod server;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use artifact::TemporaryArtifact;
pub use chunk_reader::{ChunkReader, DEFAULT_CHUNK_SIZE};
pub use client::{upload, FramedUploadSink, UploadClient, UploadMetadata, UploadSink};
pub use error::UploadError;
pub use naming::{NameAllocator, UuidNameAllocator};
pub use server::{
    FramedUploadStream, HandlerSettings, UploadEndpoint, UploadHandler, UploadPhase, UploadStream,
};
pub use service::UploadServer;
pub use storage::{ArtifactStore, LocalArtifactStore};
