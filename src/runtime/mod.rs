// src/runtime/mod.rs
//! Invocation runtime
//!
//! Resolves the process role and routes every call accordingly:
//!
//! ```text
//!   invoke(service, method, args)
//!          │
//!          ├── local / runner ──► Registry ──► handler (in-process)
//!          │
//!          └── parent ──► PoolManager ──► RunnerPool.acquire()
//!                              │
//!                              └──► InvocationClient ──► runner /invoke
//!                                        │
//!                         release + retry (backoff) on failure
//! ```

pub mod dispatcher;

pub use dispatcher::Runtime;
