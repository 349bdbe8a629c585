//! Core types and shared functionality for the MyLore offline worker.
//!
//! This crate provides:
//! - Cache store with named generations on a SQLite backend
//! - Worker version and asset manifest definitions
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod version;

pub use cache::{CacheDb, CachedResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use version::{AssetManifest, WorkerVersion};
