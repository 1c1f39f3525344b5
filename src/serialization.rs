// src/serialization.rs
//! Value codec for arguments and results
//!
//! Values travel as JSON text embedded in the wire envelope. Rich types
//! (timestamps, sets, maps, nested structs) round-trip through their serde
//! representations.

use crate::utils::errors::{FlameError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encode a value
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        FlameError::serialization("Failed to serialize value").with_details(e.to_string())
    })
}

/// Decode a value
pub fn deserialize<T: DeserializeOwned>(payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| {
        FlameError::serialization("Failed to deserialize payload").with_details(e.to_string())
    })
}

/// Encode call arguments as the JSON array handlers receive
///
/// Tuples map to arrays directly; `()` becomes an empty array and any other
/// single value becomes a one-element array.
pub fn to_args<A: Serialize + ?Sized>(args: &A) -> Result<Value> {
    let value = serde_json::to_value(args).map_err(|e| {
        FlameError::serialization("Failed to serialize arguments").with_details(e.to_string())
    })?;
    Ok(match value {
        Value::Null => Value::Array(vec![]),
        Value::Array(items) => Value::Array(items),
        other => Value::Array(vec![other]),
    })
}

/// Decode a JSON argument array into the handler's argument type
pub fn from_args<A: DeserializeOwned>(args: Value) -> Result<A> {
    let first_attempt = match serde_json::from_value::<A>(args.clone()) {
        Ok(decoded) => return Ok(decoded),
        Err(e) => e,
    };

    let fallback = match &args {
        Value::Array(items) if items.is_empty() => serde_json::from_value::<A>(Value::Null).ok(),
        Value::Array(items) if items.len() == 1 => {
            serde_json::from_value::<A>(items[0].clone()).ok()
        }
        _ => None,
    };

    fallback.ok_or_else(|| {
        FlameError::serialization("Invalid arguments").with_details(first_attempt.to_string())
    })
}
