//! firesync transfer job.
//!
//! This crate provides [`TransferJob`], the executor that drives one run:
//! prepare the target, fetch rows, map them, ask the confirmation gate, write
//! each record, verify, and release the source. It also provides
//! [`FixedDecision`], a non-interactive confirmation gate.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The job sequences calls between business logic in
//! the [`transfer`] crate and the port traits implemented by infrastructure
//! crates. It contains no mapping rules of its own.

mod executor;
mod gates;

pub use executor::{JobOptions, TransferJob};
pub use gates::FixedDecision;
