//! warden-core
//!
//! Resource-reserved dispatch of repository and consumer operations.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, queue, reservation, repo, call, coded errors）
//! - **ports**: 抽象化レイヤー（DocumentStore, Clock, IdGenerator, plugin traits, Conduit）
//! - **resources**: QueueRegistry, ReservationTable, ReservationCoordinator
//! - **repo**: repository / distributor / importer の管理と publish, sync
//! - **agent**: consumer 側の content handler 呼び出し
//! - **dispatch**: Operation, Dispatcher, worker lanes, call reports
//! - **app**: AppBuilder と ReaperLoop
//! - **impls**: 実装（InMemoryDocumentStore, ScopedConduit）
//! - **auth**, **config**, **observability**, **error**

pub mod agent;
pub mod app;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod repo;
pub mod resources;

#[cfg(test)]
mod testing;

pub use crate::error::{Result, WardenError};
