//! Multi-party trusted setup ceremony, run as an append-only chain of
//! contribution files on a shared directory tree.
//!
//! Four roles share this library: contributors extend the chain tip into the
//! pending directory, the aggregator drains pending into the canonical
//! chain, the verifier audits everything from scratch and the finalizer
//! closes the chain with a public randomness beacon. All cryptography lives
//! behind the toolkit seam; this crate owns ordering, integrity and
//! auditability.

pub mod aggregator;
pub mod audit;
pub mod beacon;
pub mod chain;
pub mod checksum;
pub mod config;
pub mod errors;
pub mod finalizer;
pub mod manifest;
pub mod submitter;
pub mod toolkit;
pub mod verifier;

pub use errors::{CeremonyError, Result};

/// Process exit codes shared by the role binaries. Automation keys off
/// these: 0 advances, 3 means come back later, 4 means a human looks first.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_NO_OP: i32 = 3;
pub const EXIT_NEEDS_REVIEW: i32 = 4;
