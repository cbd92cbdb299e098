use kg_core::tool::ToolError;

/// Failures talking to the graph store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("malformed query ({message}): {query}")]
    MalformedQuery { query: String, message: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("could not decode query results: {0}")]
    Decode(String),
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("'{0}' is not a usable IRI")]
    InvalidIri(String),
}

impl StoreError {
    /// Connection failures, malformed queries and timeouts end the task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionFailed(_)
                | StoreError::MalformedQuery { .. }
                | StoreError::Timeout(_)
        )
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConnectionFailed(msg) => ToolError::ConnectionFailed(msg),
            StoreError::MalformedQuery { query, message } => {
                ToolError::MalformedQuery { query, message }
            }
            StoreError::Timeout(msg) => ToolError::TimedOut(msg),
            other => ToolError::Runtime(other.to_string()),
        }
    }
}
