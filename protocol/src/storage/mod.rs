//! # Storage Module
//!
//! The ledger's persisted shape and the engine that keeps it on disk.
//!
//! ```text
//! state.rs   LedgerState, exactly the fields that survive a restart
//! db.rs      sled persistence with atomic multi-tree commits
//! ```
//!
//! The contract mutates a [`LedgerState`] in memory; the host persists it
//! after each committed operation. Nothing uncommitted ever reaches
//! [`VaultDB`].

pub mod db;
pub mod state;

pub use db::{DbError, VaultDB};
pub use state::{LedgerState, StateError};
