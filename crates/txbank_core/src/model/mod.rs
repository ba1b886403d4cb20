//! Domain model for the account store.
//!
//! # Responsibility
//! - Define canonical data structures used by repositories and services.
//!
//! # Invariants
//! - Every account is identified by a caller-chosen `AccountId`.
//! - Deletion is a hard delete; there are no tombstones.

pub mod account;
