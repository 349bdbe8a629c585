//! SQLite-backed cache store partitioned into named generations.
//!
//! This module provides the worker's persistent response cache using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Named generations created on first open and deleted wholesale
//! - Entries keyed by a SHA-256 request identity (method + canonical URL)
//! - Explicit creation and write ordering for eviction
//! - Automatic schema migrations and WAL mode

pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::CachedResponse;
pub use generations::Generation;
