//! Impls - ports の実装（開発用・テスト用）
//!
//! - **InMemoryDocumentStore**: 開発用のドキュメントストア
//! - **ScopedConduit**: プラグイン呼び出しごとの Conduit
//!
//! 本番用のストア実装は別クレートに置く想定です。

pub mod conduit;
pub mod memory_store;

pub use self::conduit::{CancelFlag, ScopedConduit};
pub use self::memory_store::InMemoryDocumentStore;
