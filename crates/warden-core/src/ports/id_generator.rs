//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock から timestamp を取る）

use crate::domain::ids::{CallId, EntryId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない ID を生成
pub trait IdGenerator: Send + Sync {
    fn generate_call_id(&self) -> CallId;

    fn generate_entry_id(&self) -> EntryId;

    /// Opaque lowercase key for records that have no typed id (e.g. distributor ids).
    fn generate_key(&self) -> String;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を渡すと timestamp 部分が固定されます（ランダム部分は残る）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_call_id(&self) -> CallId {
        CallId::from(self.next_ulid())
    }

    fn generate_entry_id(&self) -> EntryId {
        EntryId::from(self.next_ulid())
    }

    fn generate_key(&self) -> String {
        self.next_ulid().to_string().to_lowercase()
    }
}
