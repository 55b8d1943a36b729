//! MCP Mesh agent runtime.
//!
//! An agent process declares its tools up front as [`declaration::ToolSpec`]
//! records (optionally enriched with mesh and LLM bindings), registers with
//! the registry, heartbeats on an interval, and receives back a typed
//! [`runtime::ResolutionTable`] of dependency handles that user code calls
//! explicitly. There is no runtime parameter injection: declarations are
//! data, and the resolved handles flow through [`runtime::CallContext`].
//!
//! The crate also hosts the agent's `/mcp` JSON-RPC endpoint
//! ([`server`]), answering `tools/list` and `tools/call` and reporting
//! provider-side spans to the registry.

pub mod client;
pub mod declaration;
pub mod runtime;
pub mod server;

pub use client::RegistryClient;
pub use declaration::{AgentDeclaration, DeclaredTool, LlmBinding, MeshBinding, ToolSpec};
pub use runtime::{AgentRuntime, CallContext, DependencyHandle, ResolutionTable};
pub use server::{McpServer, ToolHandler};
