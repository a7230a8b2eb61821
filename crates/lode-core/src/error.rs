//! Error types for the Lode index.
use thiserror::Error;

use crate::types::Hash256;

/// Corruption detected while decoding or validating the chain state record.
///
/// All variants are fatal: the database cannot be opened on top of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("state record is {0} bytes, expected {1}")] BadLength(usize, usize),
    #[error("db version is {got} but this software only handles {supported:?}")] UnsupportedVersion { got: u32, supported: &'static [u32] },
    #[error("db genesis hash {got} does not match coin {expected}")] GenesisMismatch { got: Hash256, expected: Hash256 },
    #[error("db corrupt: flush count {flush_count} < utxo flush count {utxo_flush_count}")] FlushCountsInverted { flush_count: u32, utxo_flush_count: u32 },
    #[error("invalid first_sync flag byte {0}")] InvalidFlag(u8),
    #[error("tx count file ends at {file} but state records {state}")] TxCountMismatch { file: u64, state: u64 },
}

/// Errors from the flat header / tx-count / tx-hash files.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlatFileError {
    #[error("{count} headers starting at {start} not on disk")] HeaderRange { start: i64, count: usize },
    #[error("tx hash shard {0:04} missing")] ShardMissing(u32),
    #[error("header is {got} bytes, coin expects {expected}")] BadHeaderLength { got: usize, expected: usize },
    #[error("append at height {got} but flat files end at height {expected}")] AppendGap { expected: i64, got: i64 },
    #[error("{headers} headers appended with {hash_lists} tx hash lists")] BlockCountMismatch { headers: usize, hash_lists: usize },
}

/// Errors from UTXO lookups by outpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    /// The output is unknown to the index. Expected during normal operation
    /// (e.g. a mempool transaction spending an output of a block that has
    /// not been indexed yet); callers may retry later.
    #[error("utxo {txid}:{index} not found")] MissingUtxo { txid: Hash256, index: u16 },
    /// The owner lookup succeeded but the value record is absent. The two
    /// tables must agree, so this is corruption, never retriable.
    #[error("utxo {txid}:{index} in one table only")] OneTableOnly { txid: Hash256, index: u16 },
}

#[derive(Error, Debug)]
pub enum LodeError {
    #[error(transparent)] State(#[from] StateError),
    #[error(transparent)] FlatFile(#[from] FlatFileError),
    #[error(transparent)] Utxo(#[from] UtxoError),
    #[error("corruption: {0}")] Corrupt(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("storage: {0}")] Storage(String),
}
