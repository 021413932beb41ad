//! Ports - 抽象化レイヤー
//!
//! 外部システム（ドキュメントストア、プラグイン、時刻、ID 生成、署名鍵）への
//! インターフェースを trait として定義し、実装の詳細を隠蔽します。

pub mod clock;
pub mod conduit;
pub mod id_generator;
pub mod plugin;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::conduit::Conduit;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::plugin::{
    Binding, ContentHandler, ContentUnit, Distributor, Importer, PluginCallConfig,
    PluginCapability, PluginError,
};
pub use self::store::{
    Condition, Criteria, Cursor, Document, DocumentStore, Filter, ID_FIELD, SortOrder, Update,
    Upserted,
};
