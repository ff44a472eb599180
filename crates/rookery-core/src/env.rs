//! Environment variable utilities
//!
//! Typed readers for `ROOK_*` overrides. Unset variables yield the default;
//! set-but-unparsable values also yield the default, with a warning so a
//! typo does not go unnoticed.
//!
//! # Usage
//!
//! ```ignore
//! use rookery_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("ROOK_DATA_WORKERS", 20);
//! let nodelay: bool = env_get_bool("ROOK_TCP_NODELAY", false);
//! ```

use std::str::FromStr;
use tracing::warn;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" as true and "0", "false", "no", "off"
/// as false (case-insensitive). Anything else returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    let Ok(val) = std::env::var(key) else {
        return default;
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = %val, "ignoring unrecognised boolean");
            default
        }
    }
}

/// Get environment variable as optional value
///
/// `Some(T)` if the variable is set and parses, `None` otherwise.
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    let val = std::env::var(key).ok()?;
    match val.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %val, "ignoring unparsable value");
            None
        }
    }
}
