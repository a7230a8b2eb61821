//! Append-only flat files: headers, cumulative tx counts, tx hashes.
//!
//! These files are the only durable home for header and transaction-hash
//! data; the key-value store does not duplicate them. They carry no
//! transactional batching: every append is synced to disk before the call
//! returns, and crash recovery relies on them being append-only and
//! resumable from the height recorded in the chain state, never on
//! rollback. Appends whose offsets land at or before the previous durable
//! length simply overwrite a stale tail.
//!
//! Headers and tx counts are fixed-record-length single files indexed by
//! height. Transaction hashes are one 32-byte record per global tx number,
//! sharded across fixed-capacity `hashesNNNN` files so no single file grows
//! with the chain.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use lode_core::error::{FlatFileError, LodeError};
use lode_core::types::Hash256;

/// Byte capacity of one tx-hash shard file.
pub const TX_HASH_SHARD_SIZE: u64 = 16 * 1024 * 1024;

const TX_COUNT_RECORD: u64 = 4;
const TX_HASH_RECORD: u64 = 32;

/// Handles for the flat files plus the in-memory cumulative tx counts.
///
/// `tx_counts[n]` is the total number of transactions confirmed at or
/// before height `n` (`tx_counts[0]` counts the genesis coinbase), so its
/// length is always the appended height plus one. The array mirrors the
/// `txcount` file and is loaded fully at open.
#[derive(Debug)]
pub struct FlatFileStore {
    dir: PathBuf,
    header_len: u64,
    headers: File,
    txcount: File,
    tx_counts: Vec<u32>,
    shard_size: u64,
}

impl FlatFileStore {
    /// Open the `headers` and `txcount` files in `dir`.
    ///
    /// With `create` false, a missing file surfaces as an io `NotFound`
    /// error; shard files are always created lazily on first write.
    pub fn open(dir: &Path, header_len: usize, create: bool) -> Result<Self, LodeError> {
        let headers = open_file(&dir.join("headers"), create)?;
        let txcount = open_file(&dir.join("txcount"), create)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            header_len: header_len as u64,
            headers,
            txcount,
            tx_counts: Vec::new(),
            shard_size: TX_HASH_SHARD_SIZE,
        })
    }

    /// Load the cumulative tx counts for heights `0..=height` from disk.
    ///
    /// The file must hold at least `height + 1` records and they must be
    /// non-decreasing; anything else is corruption.
    pub fn load_tx_counts(&mut self, height: i64) -> Result<(), LodeError> {
        let entries = (height + 1) as usize;
        let mut raw = vec![0u8; entries * TX_COUNT_RECORD as usize];
        self.txcount.read_exact_at(&mut raw, 0).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                LodeError::Corrupt(format!("tx count file has fewer than {entries} records"))
            } else {
                e.into()
            }
        })?;
        let counts: Vec<u32> = raw
            .chunks_exact(TX_COUNT_RECORD as usize)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        if counts.windows(2).any(|w| w[1] < w[0]) {
            return Err(LodeError::Corrupt("tx counts are not non-decreasing".into()));
        }
        self.tx_counts = counts;
        Ok(())
    }

    /// Height of the last appended block, `-1` if nothing is appended.
    pub fn height(&self) -> i64 {
        self.tx_counts.len() as i64 - 1
    }

    /// Total number of transactions appended.
    pub fn tx_count(&self) -> u64 {
        self.tx_counts.last().copied().unwrap_or(0) as u64
    }

    /// Height containing the given transaction number: the first height
    /// whose cumulative count exceeds `tx_num`. May exceed [`height`] for a
    /// number past the end of the appended chain.
    ///
    /// [`height`]: Self::height
    pub fn tx_height(&self, tx_num: u32) -> i64 {
        self.tx_counts.partition_point(|&count| count <= tx_num) as i64
    }

    /// Append one or more blocks' headers and tx hashes.
    ///
    /// Write offsets are derived from the store's own cumulative counts,
    /// never from caller-supplied positions, so appends are always
    /// contiguous with what is already recorded. Every touched file is
    /// synced before returning.
    pub fn append(
        &mut self,
        headers: &[Vec<u8>],
        block_tx_hashes: &[Vec<Hash256>],
    ) -> Result<(), LodeError> {
        if headers.len() != block_tx_hashes.len() {
            return Err(FlatFileError::BlockCountMismatch {
                headers: headers.len(),
                hash_lists: block_tx_hashes.len(),
            }
            .into());
        }
        for header in headers {
            if header.len() != self.header_len as usize {
                return Err(FlatFileError::BadHeaderLength {
                    got: header.len(),
                    expected: self.header_len as usize,
                }
                .into());
            }
        }

        let first_new = self.tx_counts.len() as u64;
        let prior_tx_count = self.tx_count();

        // Pack every cumulative count before mutating anything; the
        // in-memory array must never run ahead of the file.
        let mut cum = prior_tx_count;
        let mut new_counts = Vec::with_capacity(block_tx_hashes.len());
        let mut count_buf = Vec::with_capacity(block_tx_hashes.len() * TX_COUNT_RECORD as usize);
        for hashes in block_tx_hashes {
            cum += hashes.len() as u64;
            let packed = u32::try_from(cum)
                .map_err(|_| LodeError::Corrupt("cumulative tx count exceeds u32".into()))?;
            new_counts.push(packed);
            count_buf.extend_from_slice(&packed.to_le_bytes());
        }

        // First the headers.
        let header_buf: Vec<u8> = headers.concat();
        self.headers
            .write_all_at(&header_buf, first_new * self.header_len)?;
        self.headers.sync_data()?;

        // Then the tx counts.
        self.txcount
            .write_all_at(&count_buf, first_new * TX_COUNT_RECORD)?;
        self.txcount.sync_data()?;
        self.tx_counts.extend(new_counts);

        // Finally the hashes, split across shard files.
        let mut hash_buf =
            Vec::with_capacity((cum - prior_tx_count) as usize * TX_HASH_RECORD as usize);
        for hashes in block_tx_hashes {
            for hash in hashes {
                hash_buf.extend_from_slice(hash.as_bytes());
            }
        }
        let mut cursor = 0usize;
        let mut file_pos = prior_tx_count * TX_HASH_RECORD;
        while cursor < hash_buf.len() {
            let file_num = (file_pos / self.shard_size) as u32;
            let offset = file_pos % self.shard_size;
            let size = ((hash_buf.len() - cursor) as u64).min(self.shard_size - offset) as usize;
            let shard = open_file(&self.shard_path(file_num), true)?;
            shard.write_all_at(&hash_buf[cursor..cursor + size], offset)?;
            shard.sync_data()?;
            cursor += size;
            file_pos += size as u64;
        }
        Ok(())
    }

    /// Read `count` raw headers starting at height `start`.
    ///
    /// The caller has already bounded the range against the chain height;
    /// this is a plain positioned read.
    pub fn read_headers_at(&self, start: i64, count: usize) -> Result<Vec<u8>, LodeError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; count * self.header_len as usize];
        self.headers
            .read_exact_at(&mut buf, start as u64 * self.header_len)?;
        Ok(buf)
    }

    /// Read the 32-byte hash record for the given transaction number.
    pub fn tx_hash_at(&self, tx_num: u32) -> Result<Hash256, LodeError> {
        let file_pos = tx_num as u64 * TX_HASH_RECORD;
        let file_num = (file_pos / self.shard_size) as u32;
        let offset = file_pos % self.shard_size;
        let shard = match open_file(&self.shard_path(file_num), false) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FlatFileError::ShardMissing(file_num).into());
            }
            Err(e) => return Err(e.into()),
        };
        let mut hash = [0u8; 32];
        shard.read_exact_at(&mut hash, offset)?;
        Ok(Hash256(hash))
    }

    fn shard_path(&self, file_num: u32) -> PathBuf {
        self.dir.join(format!("hashes{file_num:04}"))
    }

    #[cfg(test)]
    fn with_shard_size(mut self, shard_size: u64) -> Self {
        self.shard_size = shard_size;
        self
    }
}

fn open_file(path: &Path, create: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    if create {
        opts.create(true);
    }
    opts.open(path)
}
