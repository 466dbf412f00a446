use thiserror::Error;

/// Errors that can occur while ingesting a backup or a metadata record.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Malformed framing: unknown command tag, truncated or oversized length prefix.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A decoded payload does not match the schema of its command.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The client went away (or stalled) in the middle of a read.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The archiving subprocess could not be driven or exited non-zero.
    #[error("Subprocess error: {0}")]
    Subprocess(String),

    /// Startup configuration is missing or ambiguous.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backup storage location could not be determined.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IngestError {
    /// Whether the error was caused by what the client sent (or failed to send)
    /// rather than by the daemon or its collaborators.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            IngestError::Protocol(_) | IngestError::Validation(_) | IngestError::Connection(_)
        )
    }
}
