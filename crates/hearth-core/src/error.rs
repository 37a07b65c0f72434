use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Reminder not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Conflicting update for reminder {id}: expected version {expected}, found {found}")]
    StoreConflict {
        id: String,
        expected: i64,
        found: i64,
    },

    #[error("Delivery transport unavailable: {0}")]
    TransportUnavailable(String),
}

impl CoreError {
    /// Recoverable errors may be retried by the caller on the next
    /// reconcile pass; everything else should reject the transition.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::TransportUnavailable(_))
    }
}
