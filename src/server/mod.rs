// src/server/mod.rs
//! Runner-side HTTP server

pub mod runner_server;

pub use runner_server::{start_runner_server, RunnerServerHandle, RunnerServerOptions};
