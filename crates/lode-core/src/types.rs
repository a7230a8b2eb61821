//! Core index types: hashes, address fingerprints, UTXOs.
//!
//! Heights are `i64` with `-1` meaning an empty database. Transaction
//! numbers are dense `u32` identifiers assigned in chain order; they are
//! the compact stand-in for 32-byte transaction hashes throughout the
//! on-disk index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte hash value.
///
/// Used for block header hashes, transaction hashes, and the genesis hash
/// recorded in the chain state.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). The tip hash of an empty database.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Length in bytes of an address fingerprint.
pub const FINGERPRINT_LEN: usize = 21;

/// A 21-byte address fingerprint: one version byte followed by the
/// 160-bit hash of the output's spending script.
///
/// This is the indexing key for all address-history and UTXO lookups;
/// full scripts and addresses never appear in the database.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Parse a fingerprint from a 21-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; FINGERPRINT_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An unspent transaction output as returned by address queries.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// Dense transaction number of the creating transaction.
    pub tx_num: u32,
    /// Output index within the creating transaction.
    pub tx_pos: u32,
    /// Hash of the creating transaction, `None` if its block is not yet
    /// reflected in the flushed chain state.
    pub tx_hash: Option<Hash256>,
    /// Height of the creating transaction.
    pub height: i64,
    /// Output value in the coin's base unit.
    pub value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_display_round_trips() {
        let hash = Hash256([0xab; 32]);
        let parsed: Hash256 = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn hash_rejects_short_hex() {
        assert!("abcd".parse::<Hash256>().is_err());
    }

    #[test]
    fn zero_hash() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256([1; 32]).is_zero());
    }

    #[test]
    fn fingerprint_from_slice_checks_length() {
        assert!(Fingerprint::from_slice(&[0u8; 21]).is_some());
        assert!(Fingerprint::from_slice(&[0u8; 20]).is_none());
        assert!(Fingerprint::from_slice(&[0u8; 22]).is_none());
    }

    proptest! {
        #[test]
        fn any_hash_round_trips_through_hex(bytes in prop::array::uniform32(any::<u8>())) {
            let hash = Hash256(bytes);
            prop_assert_eq!(hash.to_string().parse::<Hash256>().unwrap(), hash);
        }
    }
}
