//! Dispatch - plugin registry, operations, queue lanes
//!
//! - **PluginRegistry**: type_id → plugin の対応表
//! - **Operation / OperationExecutor**: 作業単位とその実行
//! - **Dispatcher**: resource の queue に載せて lane で直列実行

pub mod calls;
pub mod dispatcher;
pub mod executor;
pub mod operation;
pub mod registry;
pub mod worker;

pub use self::calls::CallReportStore;
pub use self::dispatcher::Dispatcher;
pub use self::executor::OperationExecutor;
pub use self::operation::Operation;
pub use self::registry::PluginRegistry;
pub use self::worker::WorkerPool;
