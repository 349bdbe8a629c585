//! MCP tool implementations.
//!
//! This module contains all tools exposed by the worker host.

pub mod control;
pub mod force_refresh;
pub mod worker_fetch;
pub mod worker_status;

pub use control::{clear_cache_impl, get_cache_size_impl, skip_waiting_impl};
pub use force_refresh::force_refresh_impl;
pub use worker_fetch::{WorkerFetchParams, fetch_impl};
pub use worker_status::status_impl;
