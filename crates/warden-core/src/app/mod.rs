//! App - アプリケーション層
//!
//! ports と manager を組み合わせて、起動できる形にまとめます。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定の検証、プラグイン登録、ワイヤリング
//! - **ReaperLoop**: missing になった queue とその予約の回収

pub mod builder;
pub mod reaper_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::reaper_loop::ReaperLoop;
