//! Processor configuration

use payhook_dispatch::OutboxConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default per-request pipeline deadline
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Payload keys redacted by default (case-insensitive substring match)
pub const DEFAULT_REDACT_KEYS: &[&str] = &[
    "authorization",
    "card",
    "cvv",
    "pan",
    "pin",
    "password",
    "secret",
    "token",
];

/// Configuration for the webhook processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Deadline for one claim's pipeline run
    pub timeout_ms: u64,
    /// Test-only escape hatch: mark every signature valid
    pub skip_signature_verification: bool,
    /// Create a PENDING transaction when an initial payment event has no
    /// match
    pub auto_create_transactions: bool,
    /// Raise `PipelineError` instead of embedding failures in the result
    pub throw_on_error: bool,
    /// Key-name substrings whose values are redacted from stored payloads
    pub redact_keys: Vec<String>,
    /// Candidate secrets per provider, tried in order (rotation)
    pub secrets: HashMap<String, Vec<String>>,
    /// Outbox behavior for the dispatch stage and worker
    pub outbox: OutboxConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            skip_signature_verification: false,
            auto_create_transactions: false,
            throw_on_error: false,
            redact_keys: DEFAULT_REDACT_KEYS.iter().map(|s| s.to_string()).collect(),
            secrets: HashMap::new(),
            outbox: OutboxConfig::default(),
        }
    }
}

impl ProcessorConfig {
    /// Candidate secrets for a provider
    pub fn secrets_for(&self, provider: &str) -> &[String] {
        self.secrets
            .get(provider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Load provider secrets from `PAYHOOK_SECRET_<PROVIDER>` environment
    /// variables. Multiple secrets are comma-separated, newest last is
    /// NOT assumed - order in the variable is the order tried.
    pub fn load_secrets_from_env(&mut self, providers: &[&str]) {
        for provider in providers {
            let var = format!("PAYHOOK_SECRET_{}", provider.to_ascii_uppercase());
            if let Ok(value) = std::env::var(&var) {
                let secrets: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if !secrets.is_empty() {
                    self.secrets.insert(provider.to_string(), secrets);
                }
            }
        }
    }
}
