//! Worker runtime for the MyLore offline cache.
//!
//! This crate provides request routing, the caching strategies, the worker
//! lifecycle, the page-side update coordinator and the cache size governor,
//! all built on the cache store from `mylore-core`.

pub mod fetch;
pub mod governor;
pub mod lifecycle;
pub mod router;
pub mod strategy;
pub mod update;

pub use fetch::{
    FetchConfig, FetchRequest, FetchResponse, Fetcher, HttpFetcher, Method, ResponseSource, WorkerResponse,
};
pub use governor::{CacheGovernor, GovernorConfig, StorageEstimate};
pub use lifecycle::{
    ClientId, ControlMessage, ControlReply, ControllerStatus, LifecycleController, LifecycleEvent, ServiceWorker,
    VersionSource, WorkerState, WorkerStatus,
};
pub use router::{Route, Router};
pub use strategy::StrategyEngine;
pub use update::{Page, ReloadState, UpdateCoordinator};
