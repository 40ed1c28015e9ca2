//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a connector is open.
//!
//! # Tasks
//! - Expiry sweep: Removes expired records from the store at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
