//! Shared model types for the archivist migration pipeline.
//!
//! Pure data types used by the engine, the ledger backends, and the CLI.
//! Kept in their own crate so the state and engine crates can share them
//! without circular dependencies.

#![warn(clippy::pedantic)]

pub mod classification;
pub mod error;
pub mod ledger;
pub mod record;
pub mod run;
