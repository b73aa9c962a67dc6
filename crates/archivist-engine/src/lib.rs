//! Core pipeline crate for archivist: classification, archival and read
//! routing for legacy record migration.

#![warn(clippy::pedantic)]

pub mod archive;
pub(crate) mod checkpoint;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod errors;
pub mod locks;
pub mod orchestrator;
pub mod resolve;
pub mod result;
pub mod router;
pub mod source;

// Re-export public API for convenience
pub use errors::{MigrationError, RetryPolicy};
pub use orchestrator::{Orchestrator, RunOptions};
pub use resolve::{build_orchestrator, build_router, check_components, resolve, run_migration, Components};
pub use result::{CheckResult, FailedRecord, RecordOutcome, RunSummary, SkipReason};
pub use router::{ReadRouter, RecordSource, RoutedRecord};
