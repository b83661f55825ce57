//! Client configuration

use std::path::PathBuf;

/// Configuration for the community API client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the community API, e.g. `https://host/api/v1/community`
    pub base_url: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Cache freshness window in milliseconds (default: 30_000)
    pub cache_fresh_ms: u64,
    /// Where to persist the credential bundle; `None` keeps it in memory only
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1/community".to_string(),
            timeout_secs: 30,
            cache_fresh_ms: 30_000,
            credentials_path: None,
        }
    }
}
