//! Shared data model and wire types for the MCP Mesh control plane.
//!
//! This crate holds everything the registry, the agent runtime and the
//! `meshctl` controller agree on: entity types, identifiers, the tag and
//! version matching primitives used by the resolver, the JSON-RPC envelope
//! spoken on `/mcp` endpoints, trace-context propagation, and the error
//! taxonomy mapped to HTTP statuses and CLI exit codes.
//!
//! Nothing in here performs I/O; the crate is a pure dependency of the
//! heavier service crates.

pub mod env;
pub mod error;
pub mod id;
pub mod rpc;
pub mod tags;
pub mod trace;
pub mod types;
pub mod version;
pub mod wire;

pub use error::{MeshError, Result};
pub use id::{AgentId, SpanId, TraceId};
pub use tags::TagSet;
pub use trace::{Span, TraceContext, HEADER_PARENT_SPAN, HEADER_TRACE_ID};
pub use types::{
    Agent, AgentStatus, AgentType, Capability, DependencySpec, ResolvedProvider,
};
pub use version::VersionConstraint;
