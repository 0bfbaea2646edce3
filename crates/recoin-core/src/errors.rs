/// Typed error taxonomy for thread operations.
///
/// Every variant is recoverable: the offending operation is rejected and
/// no state changes are left behind. Callers map these to wire error codes
/// via `code()`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChatError {
    /// Input rejected before touching state (empty content, sender equals
    /// receiver, missing participant or item fields).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Mutation attempted with no authenticated user bound.
    #[error("not authenticated: {0}")]
    Auth(String),

    /// An open conversation already exists for the same participant pair
    /// and item. Raised by the index, recovered by re-resolving the
    /// winner; callers only see it if they bypass the engine.
    #[error("open conversation already exists: {0}")]
    Conflict(String),

    /// Operation named a conversation that does not exist.
    #[error("conversation not found: {0}")]
    NotFound(String),
}

impl ChatError {
    /// Wire error code for the RPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Conflict(_) => "CONFLICT_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
        }
    }

    /// True when retrying the same call after a state change could succeed.
    /// Validation failures stay invalid until the input changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
