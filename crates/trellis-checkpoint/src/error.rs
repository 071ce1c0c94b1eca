use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors surfaced by checkpoint savers.
///
/// Absence of a checkpoint is not an error: lookups return `Ok(None)` and
/// listings return an empty `Vec`.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Caller contract violation (malformed locator or filter). Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored payload could not be decoded by the configured serializer.
    #[error("decode error: {0}")]
    Decode(String),

    /// The underlying storage engine failed. Surfaced as-is, no retries.
    #[error("storage error: {0}")]
    Storage(String),
}
