use recoin_core::errors::ChatError;
use recoin_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Wire error code for the RPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Chat(e) => e.code(),
            Self::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            Self::Store(StoreError::Conflict(_)) => "CONFLICT_ERROR",
            Self::Store(_) => "INTERNAL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
