//! # lode-core
//! Foundation types, coin parameters, and errors for the Lode index.

pub mod coin;
pub mod error;
pub mod types;
