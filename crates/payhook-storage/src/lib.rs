//! PayHook Persistence Layer
//!
//! The storage port the pipeline consumes, plus two backends:
//!
//! - [`InMemoryStorage`] - a mutex-serialized store for tests and local
//!   development
//! - [`PostgresStorage`] - the production backend; pessimistic row locks
//!   (`SELECT ... FOR UPDATE`) linearize all transitions on a transaction
//!
//! # Atomicity
//!
//! Status transitions commit the status write, its audit row, the webhook
//! link, and any outbox event in a single unit of work. The transition is
//! re-validated against the state machine after the row lock is acquired,
//! which is what absorbs duplicate deliveries that race past the
//! deduplication stage.

pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod port;
pub mod postgres;

pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use models::*;
pub use port::Storage;
pub use postgres::PostgresStorage;
