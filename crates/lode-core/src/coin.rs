//! Coin and network parameters.
//!
//! The index itself is coin-agnostic: everything chain-specific it needs is
//! collected here — the genesis hash a database must match, the fixed header
//! record length, the address version bytes, and the header hash function.

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Genesis hash of the main network.
const GENESIS_MAIN: [u8; 32] = [
    0x68, 0xfa, 0xd9, 0x8b, 0xd0, 0x73, 0x15, 0xee,
    0xf9, 0x04, 0xfa, 0x3b, 0xf4, 0x34, 0x4a, 0x38,
    0xcb, 0x4f, 0x05, 0x54, 0x9f, 0x65, 0x92, 0x72,
    0xba, 0xd7, 0xb4, 0xe8, 0x89, 0x61, 0xd4, 0xc5,
];

/// Genesis hash of the test network.
const GENESIS_TEST: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0x09, 0x33, 0xea, 0x01,
    0xad, 0x0e, 0xe9, 0x84, 0x20, 0x97, 0x79, 0xba,
    0xae, 0xc3, 0xce, 0xd9, 0x0f, 0xa3, 0xf4, 0x08,
    0x71, 0x95, 0x26, 0xf8, 0xd7, 0x7f, 0x49, 0x43,
];

/// Parameters of a supported coin network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// Coin name, used in the database directory name.
    pub name: &'static str,
    /// Network name ("mainnet" or "testnet").
    pub net: &'static str,
    /// Hash of the genesis block header. A database opened with this coin
    /// must record exactly this hash.
    pub genesis_hash: Hash256,
    /// Fixed serialized length of a block header in bytes.
    pub header_len: usize,
    /// Version byte for pay-to-pubkey-hash addresses.
    pub pubkey_address: u8,
    /// Version byte for pay-to-script-hash addresses.
    pub script_address: u8,
}

impl Coin {
    /// Bitcoin main network.
    pub fn bitcoin_main() -> Self {
        Self {
            name: "bitcoin",
            net: "mainnet",
            genesis_hash: Hash256(GENESIS_MAIN),
            header_len: 80,
            pubkey_address: 55,
            script_address: 22,
        }
    }

    /// Bitcoin test network (testnet3).
    pub fn bitcoin_test() -> Self {
        Self {
            name: "bitcoin",
            net: "testnet",
            genesis_hash: Hash256(GENESIS_TEST),
            header_len: 80,
            pubkey_address: 113,
            script_address: 196,
        }
    }

    /// Hash a serialized block header (double SHA-256).
    pub fn header_hash(&self, header: &[u8]) -> Hash256 {
        let first = Sha256::digest(header);
        let second = Sha256::digest(first);
        Hash256(second.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networks_differ_by_genesis() {
        let main = Coin::bitcoin_main();
        let test = Coin::bitcoin_test();
        assert_ne!(main.genesis_hash, test.genesis_hash);
        assert_eq!(main.header_len, 80);
        assert_eq!(test.header_len, 80);
    }

    #[test]
    fn genesis_hash_matches_hex() {
        let main = Coin::bitcoin_main();
        assert_eq!(
            main.genesis_hash.to_string(),
            "68fad98bd07315eef904fa3bf4344a38cb4f05549f659272bad7b4e88961d4c5"
        );
    }

    #[test]
    fn header_hash_is_double_sha256() {
        let coin = Coin::bitcoin_main();
        let header = [0u8; 80];
        let first = Sha256::digest(header);
        let expected = Hash256(Sha256::digest(first).into());
        assert_eq!(coin.header_hash(&header), expected);
    }
}
