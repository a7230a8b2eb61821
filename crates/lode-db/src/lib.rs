//! Persistence layer of the chain index.
//!
//! The index splits its data between two stores. Immutable, strictly
//! append-only chain data (block headers, cumulative transaction counts,
//! transaction hashes) lives in flat files ([`flatfile`]); everything keyed
//! by address or outpoint (history, UTXOs, undo information) lives in an
//! ordered key-value store, together with a single chain-state record
//! ([`state`]) that pins the database's flushed position.
//!
//! [`IndexDb`] is the entry point: open it with a [`DbConfig`] and it
//! validates the state, repairs any unclean shutdown, and serves queries.

pub mod config;
pub mod db;
pub mod flatfile;
pub mod state;

pub use config::DbConfig;
pub use db::IndexDb;
pub use flatfile::FlatFileStore;
pub use state::ChainState;
