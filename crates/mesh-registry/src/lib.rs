//! MCP Mesh registry.
//!
//! The registry is the authoritative directory of the mesh: agents register
//! and heartbeat here, the resolver maps their declared dependencies to
//! concrete provider endpoints, the liveness sweeper ages them through
//! healthy → degraded → expired, the proxy forwards JSON-RPC tool calls to
//! agents the caller cannot reach directly, and the trace sink assembles
//! reported spans into call trees.
//!
//! Layering, leaves first: [`store`] (sqlite persistence) and [`state`]
//! (the in-memory directory behind a single writer) feed [`resolver`];
//! [`liveness`] drives status transitions; [`service`] orchestrates the
//! whole thing and [`api`] exposes it over HTTP.

pub mod api;
pub mod liveness;
pub mod resolver;
pub mod service;
pub mod state;
pub mod store;
pub mod traces;

pub use liveness::LivenessConfig;
pub use service::RegistryService;
pub use state::MeshState;
pub use store::SqliteStore;
pub use traces::TraceStore;
