use chat_protocol::Uuid;
use thiserror::Error;

/// Error type for model mutations.
///
/// Unknown entity references are not errors — those operations return `None`
/// and are surfaced on the wire as an absent NULLABLE value.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A replay entrypoint was handed an id the model already holds.
    #[error("duplicate id {0}")]
    Duplicate(Uuid),
    /// A replay entrypoint referenced a user or conversation the model does
    /// not hold.
    #[error("unknown referenced entity {0}")]
    UnknownEntity(Uuid),
    /// The transaction log could not be appended.  The in-memory model has
    /// diverged from durable state; the process must not continue.
    #[error("journal append failed: {0}")]
    Journal(#[from] std::io::Error),
}
