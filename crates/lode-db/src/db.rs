//! Interface to the chain index database.
//!
//! [`IndexDb`] composes the key-value store and the flat files into the
//! read/maintenance layer of the index: it validates the persisted chain
//! state at open, repairs the aftermath of an unclean shutdown, and serves
//! the address-history and UTXO queries. Steady-state writes are driven by
//! an external block-processing pipeline through [`IndexDb::fs_update`],
//! [`IndexDb::write_undo_info`], and [`IndexDb::write_state`]; this layer
//! itself only writes during recovery.
//!
//! Key layout (single keyspace, ascending byte order):
//!
//! - `state` — chain state record ([`crate::state`]).
//! - `H` + fingerprint(21) + flush_id(2 BE) — packed u32 LE tx numbers.
//! - `h` + tx_hash\[..4\] + tx_pos(2 LE) + tx_num(4 LE) — fingerprint(21).
//! - `u` + fingerprint(21) + tx_pos(2 LE) + tx_num(4 LE) — value(8 LE).
//! - `U` + height(4 BE) — opaque undo blob.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use lode_core::error::{FlatFileError, LodeError, StateError, UtxoError};
use lode_core::types::{Fingerprint, Hash256, Utxo, FINGERPRINT_LEN};

use crate::config::DbConfig;
use crate::flatfile::FlatFileStore;
use crate::state::{ChainState, STATE_KEY};

const HIST_PREFIX: u8 = b'H';
const OWNER_PREFIX: u8 = b'h';
const UTXO_PREFIX: u8 = b'u';
const UNDO_PREFIX: u8 = b'U';

const HIST_KEY_LEN: usize = 1 + FINGERPRINT_LEN + 2;
const UNDO_KEY_LEN: usize = 1 + 4;

/// The chain index database: key-value store, flat files, chain state.
#[derive(Debug)]
pub struct IndexDb {
    kv: DB,
    files: FlatFileStore,
    /// Current chain state. The external block processor advances the
    /// fields and persists them with [`IndexDb::write_state`] inside its
    /// flush batches.
    pub state: ChainState,
    config: DbConfig,
}

impl IndexDb {
    /// Open or create the database, then run crash recovery.
    ///
    /// Recovery runs before any query is served: excess history flushed
    /// past the last completed UTXO flush is deleted, undo records beyond
    /// the reorg horizon are pruned, and the repaired state is committed in
    /// one atomic batch.
    pub fn open(config: DbConfig) -> Result<Self, LodeError> {
        tracing::info!(reorg_limit = config.reorg_limit, "opening index database");
        std::fs::create_dir_all(&config.db_dir)?;

        // The open-file budget depends on the persisted first-sync flag,
        // which is only known after reading the state; a mismatch forces
        // one reopen with the retuned budget.
        let mut first_sync = true;
        let (kv, state) = loop {
            let kv = Self::open_kv(&config, first_sync)?;
            let state = match kv
                .get(STATE_KEY)
                .map_err(|e| LodeError::Storage(e.to_string()))?
            {
                Some(raw) => ChainState::decode(&raw, &config.coin)?,
                None => {
                    tracing::info!(
                        coin = config.coin.name,
                        net = config.coin.net,
                        "created new database"
                    );
                    ChainState::new(&config.coin)
                }
            };
            if state.first_sync == first_sync {
                break (kv, state);
            }
            tracing::info!(
                first_sync = state.first_sync,
                "reopening key-value store with retuned file limits"
            );
            first_sync = state.first_sync;
            // The store lock is released when `kv` drops at the end of
            // this iteration, before the reopen.
        };

        let create = state.height == -1;
        let mut files = FlatFileStore::open(&config.db_dir, config.coin.header_len, create)?;
        files.load_tx_counts(state.height)?;
        if files.tx_count() != state.tx_count {
            return Err(StateError::TxCountMismatch {
                file: files.tx_count(),
                state: state.tx_count,
            }
            .into());
        }

        let mut db = Self {
            kv,
            files,
            state,
            config,
        };
        db.log_state();
        db.clean_db()?;
        Ok(db)
    }

    /// Close and reopen the database, re-reading and re-validating the
    /// chain state. Consumes the handle so no query can race the reopen.
    pub fn reopen(self) -> Result<Self, LodeError> {
        let config = self.config.clone();
        drop(self);
        Self::open(config)
    }

    fn open_kv(config: &DbConfig, first_sync: bool) -> Result<DB, LodeError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(if first_sync {
            config.max_open_files_first_sync
        } else {
            config.max_open_files
        });
        DB::open(&opts, config.kv_path()).map_err(|e| LodeError::Storage(e.to_string()))
    }

    fn log_state(&self) {
        tracing::info!(
            db_version = self.state.db_version,
            coin = self.config.coin.name,
            net = self.config.coin.net,
            height = self.state.height,
            tip = %self.state.tip,
            tx_count = self.state.tx_count,
            "opened chain index"
        );
        if self.state.first_sync {
            tracing::info!(sync_time = %fmt_time(self.state.wall_time), "first sync in progress");
        }
    }

    // --- Recovery ---

    /// Clean out stale items: excess history flushed since the most recent
    /// UTXO flush (only present after an unclean shutdown) and undo records
    /// older than the reorg horizon. The deletions and the repaired state
    /// commit as one atomic batch; partial recovery must be impossible.
    fn clean_db(&mut self) -> Result<(), LodeError> {
        let mut history_keys = Vec::new();
        if self.state.flush_count > self.state.utxo_flush_count {
            tracing::info!("database shut down uncleanly, scanning for excess history flushes");
            history_keys = self.excess_history_keys()?;
            tracing::info!(entries = history_keys.len(), "deleting excess history entries");
            self.state.utxo_flush_count = self.state.flush_count;
        }

        let undo_keys = self.stale_undo_keys()?;
        if !undo_keys.is_empty() {
            tracing::info!(entries = undo_keys.len(), "deleting stale undo entries");
        }

        let mut batch = WriteBatch::default();
        for key in history_keys.iter().chain(undo_keys.iter()) {
            batch.delete(key);
        }
        self.write_state(&mut batch);
        self.kv
            .write(batch)
            .map_err(|e| LodeError::Storage(e.to_string()))
    }

    /// History keys whose flush-batch id exceeds the last completed UTXO
    /// flush. Their writes are not covered by a UTXO flush and so disagree
    /// with the UTXO index they should correspond to.
    fn excess_history_keys(&self) -> Result<Vec<Vec<u8>>, LodeError> {
        let prefix = [HIST_PREFIX];
        let mut keys = Vec::new();
        for item in self.kv.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item.map_err(|e| LodeError::Storage(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() != HIST_KEY_LEN {
                return Err(LodeError::Corrupt(format!(
                    "history key is {} bytes, expected {HIST_KEY_LEN}",
                    key.len()
                )));
            }
            let flush_id =
                u16::from_be_bytes(key[key.len() - 2..].try_into().unwrap()) as u32;
            if flush_id > self.state.utxo_flush_count {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    /// Undo keys at or below the reorg horizon, in ascending height order.
    fn stale_undo_keys(&self) -> Result<Vec<Vec<u8>>, LodeError> {
        let cutoff = self.state.height - self.config.reorg_limit as i64;
        let prefix = [UNDO_PREFIX];
        let mut keys = Vec::new();
        for item in self.kv.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item.map_err(|e| LodeError::Storage(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() != UNDO_KEY_LEN {
                return Err(LodeError::Corrupt(format!(
                    "undo key is {} bytes, expected {UNDO_KEY_LEN}",
                    key.len()
                )));
            }
            let height = u32::from_be_bytes(key[1..].try_into().unwrap());
            if height as i64 > cutoff {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    // --- Write-side API, driven by the external block processor ---

    /// Serialize the chain state into `batch`.
    ///
    /// The state never gets a standalone write: it must advance atomically
    /// with whatever index mutations happened in the same flush.
    pub fn write_state(&self, batch: &mut WriteBatch) {
        batch.put(STATE_KEY, self.state.encode());
    }

    /// Append headers and per-block tx hashes to the flat files.
    ///
    /// `fs_height` is the height the flat files currently end at and only
    /// serves as a cross-check; offsets come from the files' own counts.
    /// No recorded database state is updated: the flat files are append
    /// only, so after a crash the writer just resumes from the state
    /// height.
    pub fn fs_update(
        &mut self,
        fs_height: i64,
        headers: &[Vec<u8>],
        block_tx_hashes: &[Vec<Hash256>],
    ) -> Result<(), LodeError> {
        if fs_height != self.files.height() {
            return Err(FlatFileError::AppendGap {
                expected: self.files.height(),
                got: fs_height,
            }
            .into());
        }
        self.files.append(headers, block_tx_hashes)
    }

    /// Write undo information for the given height.
    pub fn write_undo_info(&self, height: u32, undo_info: &[u8]) -> Result<(), LodeError> {
        self.kv
            .put(undo_key(height), undo_info)
            .map_err(|e| LodeError::Storage(e.to_string()))
    }

    /// Read undo information for the given height.
    pub fn read_undo_info(&self, height: u32) -> Result<Option<Vec<u8>>, LodeError> {
        self.kv
            .get(undo_key(height))
            .map_err(|e| LodeError::Storage(e.to_string()))
    }

    // --- Queries ---

    /// Read `count` headers starting at height `start`, concatenated in
    /// height order. The whole range must lie within the flushed chain.
    pub fn read_headers(&self, start: i64, count: usize) -> Result<Vec<u8>, LodeError> {
        if start < 0 {
            return Err(FlatFileError::HeaderRange { start, count }.into());
        }
        // Compare unsigned: a count beyond i64 must not wrap negative and
        // slip past the check.
        let available = (self.state.height + 1 - start).max(0) as u64;
        if count as u64 > available {
            return Err(FlatFileError::HeaderRange { start, count }.into());
        }
        self.files.read_headers_at(start, count)
    }

    /// Block hashes for `count` heights starting at `start`.
    pub fn block_hashes(&self, start: i64, count: usize) -> Result<Vec<Hash256>, LodeError> {
        let raw = self.read_headers(start, count)?;
        Ok(raw
            .chunks_exact(self.config.coin.header_len)
            .map(|header| self.config.coin.header_hash(header))
            .collect())
    }

    /// Resolve a transaction number to `(tx_hash, height)`.
    ///
    /// A number past the flushed height resolves to `(None, height)`: the
    /// transaction was appended to the flat files but its block is not yet
    /// reflected in the chain state.
    pub fn fs_tx_hash(&self, tx_num: u32) -> Result<(Option<Hash256>, i64), LodeError> {
        let height = self.files.tx_height(tx_num);
        if height > self.state.height {
            return Ok((None, height));
        }
        Ok((Some(self.files.tx_hash_at(tx_num)?), height))
    }

    /// Confirmed transactions that touched the address, as `(tx_hash,
    /// height)` pairs, earliest in the chain first. Includes both spending
    /// and receiving transactions. `limit` caps the result; `None` returns
    /// everything.
    pub fn get_history(
        &self,
        fingerprint: &Fingerprint,
        limit: Option<usize>,
    ) -> Result<Vec<(Option<Hash256>, i64)>, LodeError> {
        let mut prefix = Vec::with_capacity(1 + FINGERPRINT_LEN);
        prefix.push(HIST_PREFIX);
        prefix.extend_from_slice(fingerprint.as_bytes());

        let mut history = Vec::new();
        for item in self.kv.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| LodeError::Storage(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if value.len() % 4 != 0 {
                return Err(LodeError::Corrupt(format!(
                    "history value is {} bytes, expected a multiple of 4",
                    value.len()
                )));
            }
            for raw in value.chunks_exact(4) {
                if Some(history.len()) == limit {
                    return Ok(history);
                }
                let tx_num = u32::from_le_bytes(raw.try_into().unwrap());
                history.push(self.fs_tx_hash(tx_num)?);
            }
        }
        Ok(history)
    }

    /// All UTXOs of an address, in no particular order. `limit` caps the
    /// result; `None` returns everything.
    pub fn get_utxos(
        &self,
        fingerprint: &Fingerprint,
        limit: Option<usize>,
    ) -> Result<Vec<Utxo>, LodeError> {
        let mut prefix = Vec::with_capacity(1 + FINGERPRINT_LEN);
        prefix.push(UTXO_PREFIX);
        prefix.extend_from_slice(fingerprint.as_bytes());

        let mut utxos = Vec::new();
        for item in self.kv.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| LodeError::Storage(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if Some(utxos.len()) == limit {
                return Ok(utxos);
            }
            if key.len() != prefix.len() + 6 {
                return Err(LodeError::Corrupt(format!(
                    "utxo key is {} bytes, expected {}",
                    key.len(),
                    prefix.len() + 6
                )));
            }
            if value.len() != 8 {
                return Err(LodeError::Corrupt(format!(
                    "utxo value record is {} bytes, expected 8",
                    value.len()
                )));
            }
            let tx_pos =
                u16::from_le_bytes(key[prefix.len()..prefix.len() + 2].try_into().unwrap());
            let tx_num = u32::from_le_bytes(key[prefix.len() + 2..].try_into().unwrap());
            let value = u64::from_le_bytes(value[..].try_into().unwrap());
            let (tx_hash, height) = self.fs_tx_hash(tx_num)?;
            utxos.push(Utxo {
                tx_num,
                tx_pos: tx_pos as u32,
                tx_hash,
                height,
                value,
            });
        }
        Ok(utxos)
    }

    /// Confirmed balance of an address.
    pub fn get_balance(&self, fingerprint: &Fingerprint) -> Result<u64, LodeError> {
        Ok(self
            .get_utxos(fingerprint, None)?
            .iter()
            .map(|utxo| utxo.value)
            .sum())
    }

    /// Owning address fingerprint of a UTXO, `None` if unknown.
    ///
    /// Output indices above 65535 cannot appear in the index and resolve
    /// to `None` without a scan.
    pub fn utxo_fingerprint(
        &self,
        tx_hash: &Hash256,
        index: u32,
    ) -> Result<Option<Fingerprint>, LodeError> {
        let Ok(index) = u16::try_from(index) else {
            return Ok(None);
        };
        Ok(self.utxo_owner(tx_hash, index)?.map(|(owner, _)| owner))
    }

    /// Given a prevout, return its `(fingerprint, value)` pair.
    ///
    /// Fails with [`UtxoError::MissingUtxo`] if the output is unknown —
    /// expected when the producing block is not indexed yet, callers may
    /// retry — and with [`UtxoError::OneTableOnly`] if the owner record
    /// exists but the value record does not, which is corruption.
    pub fn lookup_utxo(
        &self,
        tx_hash: &Hash256,
        index: u16,
    ) -> Result<(Fingerprint, u64), LodeError> {
        let Some((fingerprint, tx_num)) = self.utxo_owner(tx_hash, index)? else {
            // Can happen when the daemon is a block ahead of the index and
            // mempool transactions spend outputs from that new block.
            return Err(UtxoError::MissingUtxo {
                txid: *tx_hash,
                index,
            }
            .into());
        };
        let raw = self
            .kv
            .get(utxo_key(&fingerprint, index, tx_num))
            .map_err(|e| LodeError::Storage(e.to_string()))?
            .ok_or(UtxoError::OneTableOnly {
                txid: *tx_hash,
                index,
            })?;
        if raw.len() != 8 {
            return Err(LodeError::Corrupt(format!(
                "utxo value record is {} bytes, expected 8",
                raw.len()
            )));
        }
        Ok((fingerprint, u64::from_le_bytes(raw[..].try_into().unwrap())))
    }

    /// Scan the owner-lookup table for `(fingerprint, tx_num)` of a TXO.
    ///
    /// The table is keyed by a 4-byte truncated tx hash, so unrelated
    /// transactions can collide under one prefix; each candidate's full
    /// hash is resolved through the flat files and only an exact match is
    /// returned.
    fn utxo_owner(
        &self,
        tx_hash: &Hash256,
        index: u16,
    ) -> Result<Option<(Fingerprint, u32)>, LodeError> {
        let mut prefix = Vec::with_capacity(1 + 4 + 2);
        prefix.push(OWNER_PREFIX);
        prefix.extend_from_slice(&tx_hash.as_bytes()[..4]);
        prefix.extend_from_slice(&index.to_le_bytes());

        for item in self.kv.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| LodeError::Storage(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() != prefix.len() + 4 {
                return Err(LodeError::Corrupt(format!(
                    "owner key is {} bytes, expected {}",
                    key.len(),
                    prefix.len() + 4
                )));
            }
            let fingerprint = Fingerprint::from_slice(&value).ok_or_else(|| {
                LodeError::Corrupt(format!(
                    "owner record is {} bytes, expected {FINGERPRINT_LEN}",
                    value.len()
                ))
            })?;
            let tx_num = u32::from_le_bytes(key[prefix.len()..].try_into().unwrap());
            let (hash, _) = self.fs_tx_hash(tx_num)?;
            if hash == Some(*tx_hash) {
                return Ok(Some((fingerprint, tx_num)));
            }
        }
        Ok(None)
    }
}

/// DB key for undo information at the given height.
fn undo_key(height: u32) -> [u8; UNDO_KEY_LEN] {
    let mut key = [0u8; UNDO_KEY_LEN];
    key[0] = UNDO_PREFIX;
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

/// DB key for a UTXO value record.
fn utxo_key(fingerprint: &Fingerprint, index: u16, tx_num: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + FINGERPRINT_LEN + 6);
    key.push(UTXO_PREFIX);
    key.extend_from_slice(fingerprint.as_bytes());
    key.extend_from_slice(&index.to_le_bytes());
    key.extend_from_slice(&tx_num.to_le_bytes());
    key
}

/// A number of seconds as days, hours, minutes, and seconds.
fn fmt_time(secs: u64) -> String {
    format!(
        "{}d {:02}h {:02}m {:02}s",
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}
