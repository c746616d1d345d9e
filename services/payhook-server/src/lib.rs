//! PayHook server library: configuration and router wiring, consumed by
//! the binary and by the HTTP test suite.

pub mod config;
pub mod routes;
