//! # 外部名の割り当て
//!
//! クライアントが申告したファイル名から、保存先で使う衝突しない名前を作る。
//! 元の名前は拡張子のヒントとしてのみ使い、パス要素は一切引き継がない。

use uuid::Uuid;

/// 引き継ぐ拡張子の最大長
pub const MAX_EXTENSION_LEN: usize = 16;

/// 外部名を割り当てるポリシー。
///
/// 純粋関数であること: I/Oも共有状態も持たず、並行に呼ばれてよい。
pub trait NameAllocator: Send + Sync {
    /// `original_name` に対する一意な外部名を返す。
    fn allocate(&self, original_name: &str) -> String;
}

impl<F> NameAllocator for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn allocate(&self, original_name: &str) -> String {
        self(original_name)
    }
}

/// UUID v4 に元の拡張子を付けた名前を割り当てる。
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidNameAllocator;

impl NameAllocator for UuidNameAllocator {
    fn allocate(&self, original_name: &str) -> String {
        let id = Uuid::new_v4();
        match extension_hint(original_name) {
            Some(ext) => format!("{id}.{ext}"),
            None => id.to_string(),
        }
    }
}

/// 元のファイル名から安全な拡張子を取り出す。
///
/// 最後のパス要素だけを見て、英数字のみで `MAX_EXTENSION_LEN` 以下の
/// 拡張子を返す。ドットファイル（`.bashrc` 等）は拡張子なしとみなす。
pub fn extension_hint(original_name: &str) -> Option<&str> {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let (stem, ext) = base.rsplit_once('.')?;

    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext)
}
