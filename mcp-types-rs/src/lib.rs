//! Shared data model for the MCP tool-invocation gateway.
//!
//! Every fallible pipeline operation returns a [`ToolResult`] value instead
//! of raising; the tagged union carries either handler output or a
//! structured [`ExecutionError`] the calling agent can act on.

pub mod invocation;
pub mod result;

pub use invocation::Invocation;
pub use result::{ErrorCode, ExecutionError, ToolResult};
