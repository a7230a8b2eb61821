//! The persisted chain state record.
//!
//! A single key in the key-value store holds a fixed-layout snapshot of the
//! database's position in the chain. It is read once at open and rewritten
//! inside every flush batch, so it always advances atomically with the index
//! mutations of that flush.
//!
//! On-disk layout (offsets in bytes):
//!
//! | field            | offset | size | encoding   |
//! |------------------|--------|------|------------|
//! | genesis          | 0      | 32   | raw bytes  |
//! | height           | 32     | 8    | i64 LE     |
//! | tx_count         | 40     | 8    | u64 LE     |
//! | tip              | 48     | 32   | raw bytes  |
//! | flush_count      | 80     | 4    | u32 LE     |
//! | utxo_flush_count | 84     | 4    | u32 LE     |
//! | wall_time        | 88     | 8    | u64 LE     |
//! | first_sync       | 96     | 1    | 0 or 1     |
//! | db_version       | 97     | 4    | u32 LE     |

use lode_core::coin::Coin;
use lode_core::error::StateError;
use lode_core::types::Hash256;

/// Database format versions this software can open.
pub const DB_VERSIONS: &[u32] = &[3];

/// Key under which the chain state record is stored.
pub const STATE_KEY: &[u8] = b"state";

const STATE_LEN: usize = 32 + 8 + 8 + 32 + 4 + 4 + 8 + 1 + 4;

/// Snapshot of the database's confirmed chain position and flush progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    /// Genesis hash this database was created for. Immutable.
    pub genesis: Hash256,
    /// Height of the last flushed block, `-1` for an empty database.
    pub height: i64,
    /// Cumulative number of transactions at `height`.
    pub tx_count: u64,
    /// Hash of the block at `height`.
    pub tip: Hash256,
    /// Number of completed database flushes.
    pub flush_count: u32,
    /// Flush count as of the last completed UTXO flush. Never exceeds
    /// `flush_count`; the gap between the two marks an unclean shutdown.
    pub utxo_flush_count: u32,
    /// Cumulative wall-clock sync time in seconds.
    pub wall_time: u64,
    /// True until the initial chain sync completes.
    pub first_sync: bool,
    /// Database format version.
    pub db_version: u32,
}

impl ChainState {
    /// Default state for a freshly created database.
    pub fn new(coin: &Coin) -> Self {
        Self {
            genesis: coin.genesis_hash,
            height: -1,
            tx_count: 0,
            tip: Hash256::ZERO,
            flush_count: 0,
            utxo_flush_count: 0,
            wall_time: 0,
            first_sync: true,
            db_version: DB_VERSIONS[DB_VERSIONS.len() - 1],
        }
    }

    /// Decode and validate a persisted record.
    ///
    /// Every failure here is corruption: wrong length, unrecognized version,
    /// a genesis hash belonging to a different coin, or flush counters that
    /// no flush sequence could have produced.
    pub fn decode(raw: &[u8], coin: &Coin) -> Result<Self, StateError> {
        if raw.len() != STATE_LEN {
            return Err(StateError::BadLength(raw.len(), STATE_LEN));
        }
        let genesis = Hash256(take::<32>(raw, 0));
        let height = i64::from_le_bytes(take::<8>(raw, 32));
        let tx_count = u64::from_le_bytes(take::<8>(raw, 40));
        let tip = Hash256(take::<32>(raw, 48));
        let flush_count = u32::from_le_bytes(take::<4>(raw, 80));
        let utxo_flush_count = u32::from_le_bytes(take::<4>(raw, 84));
        let wall_time = u64::from_le_bytes(take::<8>(raw, 88));
        let first_sync = match raw[96] {
            0 => false,
            1 => true,
            other => return Err(StateError::InvalidFlag(other)),
        };
        let db_version = u32::from_le_bytes(take::<4>(raw, 97));

        if !DB_VERSIONS.contains(&db_version) {
            return Err(StateError::UnsupportedVersion {
                got: db_version,
                supported: DB_VERSIONS,
            });
        }
        if genesis != coin.genesis_hash {
            return Err(StateError::GenesisMismatch {
                got: genesis,
                expected: coin.genesis_hash,
            });
        }
        if flush_count < utxo_flush_count {
            return Err(StateError::FlushCountsInverted {
                flush_count,
                utxo_flush_count,
            });
        }

        Ok(Self {
            genesis,
            height,
            tx_count,
            tip,
            flush_count,
            utxo_flush_count,
            wall_time,
            first_sync,
            db_version,
        })
    }

    /// Encode the record into its fixed on-disk layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(STATE_LEN);
        raw.extend_from_slice(self.genesis.as_bytes());
        raw.extend_from_slice(&self.height.to_le_bytes());
        raw.extend_from_slice(&self.tx_count.to_le_bytes());
        raw.extend_from_slice(self.tip.as_bytes());
        raw.extend_from_slice(&self.flush_count.to_le_bytes());
        raw.extend_from_slice(&self.utxo_flush_count.to_le_bytes());
        raw.extend_from_slice(&self.wall_time.to_le_bytes());
        raw.push(self.first_sync as u8);
        raw.extend_from_slice(&self.db_version.to_le_bytes());
        raw
    }
}

/// Copy N bytes out of `raw` starting at `at`. Caller has checked the length.
fn take<const N: usize>(raw: &[u8], at: usize) -> [u8; N] {
    raw[at..at + N].try_into().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coin() -> Coin {
        Coin::bitcoin_main()
    }

    fn sample() -> ChainState {
        ChainState {
            genesis: coin().genesis_hash,
            height: 123_456,
            tx_count: 9_876_543,
            tip: Hash256([7; 32]),
            flush_count: 42,
            utxo_flush_count: 40,
            wall_time: 86_461,
            first_sync: false,
            db_version: 3,
        }
    }

    #[test]
    fn round_trip() {
        let state = sample();
        let decoded = ChainState::decode(&state.encode(), &coin()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn new_database_defaults() {
        let state = ChainState::new(&coin());
        assert_eq!(state.height, -1);
        assert_eq!(state.tx_count, 0);
        assert_eq!(state.tip, Hash256::ZERO);
        assert!(state.first_sync);
        assert_eq!(state.db_version, 3);
        assert_eq!(state.genesis, coin().genesis_hash);
    }

    #[test]
    fn rejects_wrong_length() {
        let mut raw = sample().encode();
        raw.pop();
        assert_eq!(
            ChainState::decode(&raw, &coin()),
            Err(StateError::BadLength(STATE_LEN - 1, STATE_LEN))
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let mut state = sample();
        state.db_version = 99;
        let err = ChainState::decode(&state.encode(), &coin()).unwrap_err();
        assert!(matches!(err, StateError::UnsupportedVersion { got: 99, .. }));
    }

    #[test]
    fn rejects_genesis_of_other_coin() {
        let state = sample();
        let err = ChainState::decode(&state.encode(), &Coin::bitcoin_test()).unwrap_err();
        assert!(matches!(err, StateError::GenesisMismatch { .. }));
    }

    #[test]
    fn rejects_inverted_flush_counts() {
        let mut state = sample();
        state.flush_count = 1;
        state.utxo_flush_count = 2;
        let err = ChainState::decode(&state.encode(), &coin()).unwrap_err();
        assert_eq!(
            err,
            StateError::FlushCountsInverted {
                flush_count: 1,
                utxo_flush_count: 2,
            }
        );
    }

    #[test]
    fn rejects_garbage_flag_byte() {
        let mut raw = sample().encode();
        raw[96] = 7;
        assert_eq!(
            ChainState::decode(&raw, &coin()),
            Err(StateError::InvalidFlag(7))
        );
    }

    proptest! {
        #[test]
        fn round_trips_any_valid_state(
            height in -1i64..=10_000_000,
            tx_count in 0u64..u64::MAX,
            tip in prop::array::uniform32(any::<u8>()),
            utxo_flush_count in 0u32..1000,
            extra_flushes in 0u32..1000,
            wall_time in any::<u64>(),
            first_sync in any::<bool>(),
        ) {
            let state = ChainState {
                genesis: coin().genesis_hash,
                height,
                tx_count,
                tip: Hash256(tip),
                flush_count: utxo_flush_count + extra_flushes,
                utxo_flush_count,
                wall_time,
                first_sync,
                db_version: 3,
            };
            let decoded = ChainState::decode(&state.encode(), &coin()).unwrap();
            prop_assert_eq!(decoded, state);
        }
    }
}
