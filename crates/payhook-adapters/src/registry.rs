//! Adapter registry
//!
//! Immutable after construction; the pipeline resolves adapters by
//! provider name on every request.

use crate::adapter::ProviderAdapter;
use crate::{FlutterwaveAdapter, PaystackAdapter, StripeAdapter};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping provider names to adapters
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// A registry with the three reference adapters installed
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(PaystackAdapter::new()))
            .register(Arc::new(StripeAdapter::new()))
            .register(Arc::new(FlutterwaveAdapter::new()))
    }

    /// Add an adapter, keyed by its provider name
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters
            .insert(adapter.provider().to_string(), adapter);
        self
    }

    /// Look up the adapter for a provider (case-insensitive)
    pub fn get(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider.to_ascii_lowercase()).cloned()
    }

    /// Names of all registered providers
    pub fn providers(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_by_name() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.get("paystack").is_some());
        assert!(registry.get("stripe").is_some());
        assert!(registry.get("flutterwave").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.get("Paystack").is_some());
        assert!(registry.get("STRIPE").is_some());
    }
}
