//! Server configuration
//!
//! Environment variables with sensible development defaults; CLI flags
//! override.

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Use the in-memory backend instead of PostgreSQL
    pub in_memory: bool,
    /// Auto-create transactions for unmatched initial payment events
    pub auto_create_transactions: bool,
    /// Defer dispatch through the transactional outbox
    pub outbox_enabled: bool,
    /// Pipeline deadline per claim
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            in_memory: false,
            auto_create_transactions: false,
            outbox_enabled: false,
            timeout_ms: payhook_pipeline::config::DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PAYHOOK_HOST").unwrap_or(defaults.host),
            port: std::env::var("PAYHOOK_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            in_memory: env_flag("PAYHOOK_IN_MEMORY"),
            auto_create_transactions: env_flag("PAYHOOK_AUTO_CREATE"),
            outbox_enabled: env_flag("PAYHOOK_OUTBOX"),
            timeout_ms: std::env::var("PAYHOOK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_ms),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
