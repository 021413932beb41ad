//! Resources - queue registry, reservation table, coordinator
//!
//! 共有ストアだけを使って resource 単位の排他を実現する層。

pub mod coordinator;
pub mod queues;
pub mod reservations;

pub use self::coordinator::ReservationCoordinator;
pub use self::queues::{QueueCursor, QueueRegistry};
pub use self::reservations::{Decrement, ReservationTable};
