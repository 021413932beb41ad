//! Domain model (ids, records, reports, coded errors).
//!
//! Records here are plain serde structs; the document store owns the durable
//! copy and these are transient views built on read.

pub mod call;
pub mod consumer;
pub mod errors;
pub mod ids;
pub mod queue;
pub mod repo;
pub mod report;
pub mod reservation;

pub use call::{CallReport, CallState, OperationOutcome};
pub use consumer::Consumer;
pub use errors::{CodedError, ErrorCode, ErrorDocument, ErrorKind, SubError};
pub use ids::{CallId, EntryId, Id, IdMarker};
pub use queue::Queue;
pub use repo::{OperationResult, Repo, RepoDistributor, RepoImporter, ResultCode};
pub use report::PluginReport;
pub use reservation::ResourceReservation;
