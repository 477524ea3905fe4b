//! # Account Identity
//!
//! An [`AccountId`] is the immutable identity the hosting environment hands
//! to the ledger on every call. It is a 32-byte BLAKE3 digest: either of an
//! authenticated Ed25519 public key (production) or of an arbitrary seed
//! (development and tests).
//!
//! ```text
//! verifying_key (32 bytes)
//!     -> BLAKE3(verifying_key) -> 32 bytes
//!     -> hex -> "5f1c...e0" (64 chars)
//! ```
//!
//! The ledger never inspects the bytes. It only compares, orders, and hashes
//! them, so the derivation scheme can change without touching the contract.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of an account identity in bytes.
pub const ACCOUNT_ID_LENGTH: usize = 32;

/// Errors produced when parsing an account identity from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The input is not valid hexadecimal.
    #[error("account id is not valid hex: {0}")]
    InvalidHex(String),

    /// The decoded input has the wrong number of bytes.
    #[error("account id must be {expected} bytes, got {got}")]
    InvalidLength {
        /// Required length in bytes.
        expected: usize,
        /// Length actually decoded.
        got: usize,
    },
}

/// A 32-byte account identity.
///
/// Equality, ordering, and hashing all operate on the raw bytes, so
/// `AccountId` can key both `HashMap`s and `BTreeMap`s. The text form is
/// lowercase hex; the JSON form is that same string, which lets an
/// `AccountId` act as a JSON object key.
///
/// # Examples
///
/// ```
/// use capvault_protocol::identity::AccountId;
///
/// let alice = AccountId::derive(b"alice");
/// let parsed: AccountId = alice.to_string().parse().unwrap();
/// assert_eq!(alice, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId([u8; ACCOUNT_ID_LENGTH]);

impl AccountId {
    /// Wraps raw identity bytes.
    pub const fn from_bytes(bytes: [u8; ACCOUNT_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives the identity of an Ed25519 signer.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self::derive(key.as_bytes())
    }

    /// Derives an identity from an arbitrary seed. Deterministic.
    pub fn derive(seed: &[u8]) -> Self {
        Self(*blake3::hash(seed).as_bytes())
    }

    /// Returns the raw identity bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LENGTH] {
        &self.0
    }

    /// Returns the lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded identity.
    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s.trim()).map_err(|e| IdentityError::InvalidHex(e.to_string()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for AccountId {
    type Error = IdentityError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; ACCOUNT_ID_LENGTH] =
            bytes.try_into().map_err(|_| IdentityError::InvalidLength {
                expected: ACCOUNT_ID_LENGTH,
                got: bytes.len(),
            })?;
        Ok(Self(array))
    }
}

impl FromStr for AccountId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_hex()[..16])
    }
}

impl Serialize for AccountId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            AccountId::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            AccountId::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
        }
    }
}
