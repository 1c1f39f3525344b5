// src/invocation/mod.rs
//! Invocation plumbing
//!
//! - **Options**: per-call overrides (pool, timeout, idempotency key, retry)
//! - **Context**: what a handler sees about the call it serves
//! - **Protocol**: signed wire envelope between parent and runner
//! - **Remote**: HTTP dispatch of one attempt to one runner
//! - **Local**: in-process execution with a deadline

pub mod context;
pub mod local;
pub mod options;
pub mod protocol;
pub mod remote;

pub use context::InvocationContext;
pub use local::{execute_handler, invoke_local};
pub use options::{FlameOptions, RetryOptions};
pub use protocol::{build_request, BuiltRequest, InvocationRequest, InvocationResponse, WireError};
pub use remote::InvocationClient;
