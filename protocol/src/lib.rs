// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Capvault Protocol: Shared Foundations
//!
//! Everything the vault ledger and its hosts agree on, minus the ledger's
//! rules themselves (those live in `capvault-contracts`):
//!
//! - **identity**: Immutable caller identities derived from Ed25519 keys.
//! - **storage**: The persisted ledger layout and its sled-backed store.
//! - **config**: Default caps, ports, and version constants.
//!
//! ## Design Philosophy
//!
//! 1. All amounts are `u64` in the smallest unit. No floats, ever.
//! 2. The persisted layout is the ledger's fields and nothing else.
//! 3. If it touches money, it has tests.

pub mod config;
pub mod identity;
pub mod storage;
