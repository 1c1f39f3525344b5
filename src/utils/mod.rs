// src/utils/mod.rs
//! Ambient concerns: configuration and the error taxonomy

pub mod config;
pub mod errors;

pub use config::{FlameConfig, HmacConfig, Mode, ServerConfig};
pub use errors::{ErrorKind, FlameError, Result};
