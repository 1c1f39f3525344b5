// src/pool/mod.rs
//! Runner pools
//!
//! This module provides the worker side of dispatch:
//!
//! - **Runner Pool**: one named set of runners with min/max sizing and
//!   per-runner concurrency slots
//! - **Pool Manager**: lazily creates and caches pools by name
//! - **Backend**: pluggable spawn/terminate capability for dynamic pools
//! - **Process Backend**: backend that runs runners as local child processes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── PoolManager ────────────────────────┐
//! │                                                             │
//! │  "default" ─► RunnerPool            "gpu" ─► RunnerPool     │
//! │               ├─ r1 [slot, slot]             ├─ spawned-1   │
//! │               └─ r2 [slot, slot]             └─ spawned-2   │
//! │                                                   ▲         │
//! │                                                   │         │
//! │                                         Backend (spawn /    │
//! │                                          terminate)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod manager;
pub mod process_backend;
pub mod runner_pool;
pub mod types;

// Re-export commonly used types
pub use backend::Backend;
pub use manager::PoolManager;
pub use process_backend::{ProcessBackend, ProcessBackendConfig};
pub use runner_pool::{PoolStats, RunnerLease, RunnerPool};
pub use types::{PoolConfig, RunnerHandle, RunnerTarget, SpawnOptions};
