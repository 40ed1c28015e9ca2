//! Cache Module
//!
//! Provides the file-backed cache connector with TTL expiration, counters
//! and prefix operations.

mod codec;
mod connector;
mod entry;


// Re-export public types
pub use codec::{decode_value, encode_value};
pub use connector::FileConnector;
pub use entry::StoredEntry;

// == Public Constants ==
/// Store path used when no setting overrides it
pub const DEFAULT_STORE_PATH: &str = "store/cache.db";
