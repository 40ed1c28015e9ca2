//! Cache File - A file-backed cache connector
//!
//! Provides cache reads, writes, counters and prefix operations over a
//! persistent redb store with per-key expiration.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::FileConnector;
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
