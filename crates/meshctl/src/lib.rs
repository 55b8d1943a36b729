//! meshctl library: the controller's building blocks.
//!
//! The binary in `main.rs` is a thin clap shell over these modules:
//! [`supervisor`] owns local process lifecycle (spawn, PID files, process
//! groups, stop escalation), [`logfile`] owns rotation and the log viewer,
//! [`caller`] owns endpoint discovery and tool dispatch with trace
//! propagation, and [`config`] owns the `~/.mcp-mesh` state root.

pub mod caller;
pub mod commands;
pub mod config;
pub mod logfile;
pub mod output;
pub mod pidfile;
pub mod sanitize;
pub mod supervisor;

pub use config::ControllerConfig;
pub use output::OutputFormat;
