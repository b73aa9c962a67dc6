//! End-to-end harness: a shared PostgreSQL container acting as the customer
//! record store (and optionally the ledger), driven through the engine.

pub mod harness;
