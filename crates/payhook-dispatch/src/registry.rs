//! Handler registry
//!
//! Maps normalized event types to the handlers interested in them.
//! Immutable after construction; runtime re-registration is not supported.

use crate::{DispatchError, DispatchPayload};
use async_trait::async_trait;
use payhook_types::NormalizedEventType;
use std::collections::HashMap;
use std::sync::Arc;

/// A downstream consumer of normalized payment events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name, recorded on every dispatch log row
    fn name(&self) -> &str;

    /// Apply the event. Must be idempotent: the outbox delivers at least
    /// once.
    async fn handle(&self, payload: &DispatchPayload) -> Result<(), DispatchError>;
}

/// Registry mapping event types to handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NormalizedEventType, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Subscribe a handler to one event type
    pub fn on(mut self, event_type: NormalizedEventType, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.entry(event_type).or_default().push(handler);
        self
    }

    /// Subscribe a handler to several event types at once
    pub fn on_each(
        mut self,
        event_types: &[NormalizedEventType],
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        for event_type in event_types {
            self.handlers
                .entry(*event_type)
                .or_default()
                .push(handler.clone());
        }
        self
    }

    /// Handlers subscribed to an event type
    pub fn handlers_for(&self, event_type: NormalizedEventType) -> &[Arc<dyn EventHandler>] {
        self.handlers
            .get(&event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any handler is subscribed to the event type
    pub fn has_handlers(&self, event_type: NormalizedEventType) -> bool {
        !self.handlers_for(event_type).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl EventHandler for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, _payload: &DispatchPayload) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::new()
            .on(NormalizedEventType::PaymentSuccessful, Arc::new(Noop("a")))
            .on(NormalizedEventType::PaymentSuccessful, Arc::new(Noop("b")))
            .on(NormalizedEventType::RefundSuccessful, Arc::new(Noop("c")));

        assert_eq!(
            registry
                .handlers_for(NormalizedEventType::PaymentSuccessful)
                .len(),
            2
        );
        assert!(registry.has_handlers(NormalizedEventType::RefundSuccessful));
        assert!(!registry.has_handlers(NormalizedEventType::ChargeDisputed));
    }
}
