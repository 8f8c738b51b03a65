//! Process-level plumbing: `.env` loading, the bind address and the
//! environment-variable readers used by [`AppConfig`].

pub mod config;

use std::{env, net::SocketAddr};

pub use config::{AppConfig, ConfigError, Environment, Mailbox, SellerProfile};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Loads `.env` when present. A missing file is not an error.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// `APP_BIND_ADDR`, or [`DEFAULT_BIND_ADDR`] when unset.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    var_or("APP_BIND_ADDR", DEFAULT_BIND_ADDR).parse()
}

pub(crate) fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Unset and blank values are both treated as missing.
pub(crate) fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn required_var(name: &'static str) -> Result<String, ConfigError> {
    optional_var(name).ok_or(ConfigError::Missing(name))
}

/// Splits on `separator`, trimming entries and dropping empty ones.
pub(crate) fn list_var(name: &str, separator: char) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn with_trailing_slash(mut value: String) -> String {
    if !value.ends_with('/') {
        value.push('/');
    }
    value
}
