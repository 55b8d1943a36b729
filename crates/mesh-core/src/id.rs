//! Identifier types for mesh entities.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MeshError;

/// A stable identifier for one agent process.
///
/// Assigned by the registry at first registration and echoed back on every
/// subsequent heartbeat. The format is `<name>-<8 hex chars>` so an id is
/// both unique and recognizable in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Generate a fresh id for an agent with the given name.
    pub fn generate(name: &str) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", name, &uuid[..8]))
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A 128-bit trace identifier rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a fresh random trace id.
    pub fn generate() -> Self {
        let value: u128 = rand::rng().random();
        Self(format!("{:032x}", value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TraceId {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(MeshError::validation(format!(
                "trace id must be 32 hex characters, got {:?}",
                s
            )))
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 64-bit span identifier rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    /// Generate a fresh random span id.
    pub fn generate() -> Self {
        let value: u64 = rand::rng().random();
        Self(format!("{:016x}", value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SpanId {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(MeshError::validation(format!(
                "span id must be 16 hex characters, got {:?}",
                s
            )))
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
