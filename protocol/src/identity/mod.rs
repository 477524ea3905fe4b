//! # Identity Module
//!
//! Caller identity for the vault ledger. The ledger treats identity as an
//! opaque, immutable value supplied by the host: whoever authenticated the
//! request decides which [`AccountId`] it acts for, and the contract only
//! ever mutates that account's vault.
//!
//! Ed25519 signers map to identities through BLAKE3, so a host that verifies
//! signed requests can derive the caller without any lookup table.

pub mod account;

pub use account::{AccountId, IdentityError, ACCOUNT_ID_LENGTH};
