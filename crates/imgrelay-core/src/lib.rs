//! imgrelay Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Async runtimes
//! - Persistence
//!
//! It holds the image-reference canonicalization engine (parsing and
//! destination rewriting) and the task/snapshot model shared by the
//! client and the coordinator.

pub mod error;
pub mod ids;
pub mod reference;
pub mod rewrite;
pub mod snapshot;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::{CoreError, ParseError};
pub use ids::TaskId;
pub use reference::{
    registry_host_of, ImageOrigin, ImageReference, DEFAULT_REGISTRY, DEFAULT_TAG,
    LIBRARY_NAMESPACE,
};
pub use rewrite::{rewrite, RewriteResult, RewriteRule};
pub use snapshot::{Snapshot, TaskListing, TaskStats};
pub use status::{TaskStatus, TransferStep};
pub use task::Task;
