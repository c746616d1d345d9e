//! PayHook Event Delivery
//!
//! The in-process handler registry, the dispatcher that fans a payload out
//! to every registered handler, and the transactional-outbox worker that
//! delivers deferred events at least once.
//!
//! Failure isolation: one handler failing never prevents the others from
//! running, and dispatch failures never change a webhook's fate - by the
//! time dispatch runs, persisted state is already the truth.

pub mod dispatcher;
pub mod outbox;
pub mod registry;
pub mod worker;

pub use dispatcher::{DispatchPayload, DispatchSummary, EventDispatcher};
pub use outbox::{outbox_event_for, OutboxConfig};
pub use registry::{EventHandler, HandlerRegistry};
pub use worker::OutboxWorker;

use thiserror::Error;

/// Errors surfaced by event handlers
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler could not apply the event
    #[error("handler failed: {message}")]
    Handler { message: String },

    /// The outbox payload could not be decoded
    #[error("undecodable outbox payload: {0}")]
    Payload(#[from] serde_json::Error),
}
