//! Browser engine configuration types.
//!
//! These types live here (always compiled) rather than behind
//! `#[cfg(feature = "browser")]` so that config parsing and `config show`
//! work without the browser feature.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Browser launch/connect configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run in headless mode (default: false, the record system is usually
    /// watched by an operator).
    #[serde(default)]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// CDP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Explicit Chrome executable. Auto-detected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing (possibly already logged in) browser
    /// instead of launching one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            proxy: None,
            timeout: default_timeout(),
            chrome_path: None,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

pub fn default_timeout() -> u64 {
    30
}
