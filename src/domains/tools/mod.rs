//! Tools domain module.
//!
//! This module handles all tool-related functionality for the MCP server.
//! Tools are executable functions that can be called by MCP clients to perform
//! specific actions or computations.
//!
//! ## Architecture
//!
//! - `contract.rs` - The `Tool` trait, descriptors and the result envelope
//! - `definitions/` - Individual tool implementations (one module per tool)
//! - `registry.rs` - Name-indexed registry and compiled input schemas, built
//!   once at startup
//! - `cancellation.rs` - Per-call cancellation signal
//! - `error.rs` - Tool-specific error types
//!
//! ## Adding a New Tool
//!
//! 1. Create a new module in `definitions/`
//! 2. Define params and output types deriving `JsonSchema`, then implement `Tool`
//! 3. Export it in `definitions/mod.rs`
//! 4. Register it in `ToolRegistry::with_builtin_tools`

pub mod cancellation;
pub mod contract;
pub mod definitions;
mod error;
mod registry;

pub use cancellation::{CancelHandle, CancellationSignal, cancellation_pair};
pub use contract::{
    Arguments, InvocationContext, Tool, ToolDescriptor, ToolInvocationResult, ToolOutput,
};
pub use error::{ExecutionError, ExecutionErrorKind, ToolError, ValidationError};
pub use registry::ToolRegistry;
