//! Error types for the MCP Mesh system.

/// Result type alias for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;

/// Main error type for the MCP Mesh system.
///
/// Each variant corresponds to one surfaced error category: the registry
/// maps variants to HTTP statuses via [`MeshError::http_status`], the
/// controller maps them to process exit codes via [`MeshError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Malformed input: bad JSON, invalid port, unparsable filter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown agent id, trace id or tool name
    #[error("Not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    /// Duplicate start, stale agent id on heartbeat
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Provider absent for a required dependency
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    /// Remote call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Connection reset, handshake failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Database write or read failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Caller exceeded a per-client rate cap
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Invariant violations and everything unrecognized
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MeshError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new rate-limited error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Whether a caller-side retry with backoff is appropriate.
    ///
    /// Only registration and heartbeat traffic retries; tool calls surface
    /// these directly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::Persistence(_)
        )
    }

    /// HTTP status code this error maps to at the request boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::Unavailable(_) => 503,
            Self::Timeout(_) => 504,
            Self::Transport(_) => 502,
            Self::Persistence(_) => 503,
            Self::RateLimited(_) => 429,
            Self::Internal(_) | Self::Io(_) | Self::Serialization(_) => 500,
        }
    }

    /// Process exit code for the `meshctl` boundary.
    ///
    /// 1 = user error, 2 = not found, 3 = remote failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::Conflict(_) | Self::Io(_) | Self::Serialization(_) => 1,
            Self::NotFound { .. } => 2,
            Self::Unavailable(_)
            | Self::Timeout(_)
            | Self::Transport(_)
            | Self::Persistence(_)
            | Self::RateLimited(_)
            | Self::Internal(_) => 3,
        }
    }
}
