//! Database configuration.
//!
//! Provides [`DbConfig`] with defaults for the data directory, coin network,
//! reorg depth, and key-value store file-handle budgets. The configuration
//! can be customized programmatically by the embedding process.

use std::path::PathBuf;

use lode_core::coin::Coin;

/// Default maximum reorganization depth, bounding undo-log retention.
pub const DEFAULT_REORG_LIMIT: u32 = 200;

/// Configuration for an index database instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Root directory for the key-value store and the flat files.
    pub db_dir: PathBuf,
    /// Coin network this database indexes.
    pub coin: Coin,
    /// Maximum supported reorg depth; undo records older than this many
    /// blocks below the tip are pruned at open.
    pub reorg_limit: u32,
    /// Key-value store open-file budget while the initial sync is running.
    pub max_open_files_first_sync: i32,
    /// Key-value store open-file budget after the initial sync completes.
    pub max_open_files: i32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("lode-data"),
            coin: Coin::bitcoin_main(),
            reorg_limit: DEFAULT_REORG_LIMIT,
            max_open_files_first_sync: 1024,
            max_open_files: 256,
        }
    }
}

impl DbConfig {
    /// Path to the key-value store directory, named after the coin network
    /// so databases of different networks never collide.
    pub fn kv_path(&self) -> PathBuf {
        self.db_dir.join(format!("{}-{}", self.coin.name, self.coin.net))
    }
}
