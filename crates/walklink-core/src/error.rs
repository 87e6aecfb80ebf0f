use thiserror::Error;

/// Failures reported by the system of record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier transport error: {0}")]
    Transport(String),
    #[error("notifier rejected request with status {0}")]
    Rejected(u16),
}

/// Command-level and connection-level failures surfaced by the hub.
///
/// The `Display` text of every variant except `Upstream` is the human-readable
/// reason sent back to the caller.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("upstream failure: {0}")]
    Upstream(#[from] StoreError),
}

impl HubError {
    pub fn authorization(message: impl Into<String>) -> Self {
        HubError::Authorization(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        HubError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HubError::NotFound(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            HubError::Authorization(_) => "authorization_failed",
            HubError::Validation(_) => "validation_failed",
            HubError::NotFound(_) => "not_found",
            HubError::Upstream(_) => "upstream_failure",
        }
    }

    /// Reason shown to the caller. Upstream details stay in the logs.
    pub fn public_message(&self, upstream_message: &str) -> String {
        match self {
            HubError::Upstream(_) => upstream_message.to_string(),
            other => other.to_string(),
        }
    }
}
