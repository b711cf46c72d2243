//! Domains module containing business logic organized by bounded contexts.
//!
//! The only context this server exposes is `tools`; the protocol runtime
//! in `core` depends on it, never the other way round.

pub mod tools;
