/// Errors from key-value store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key holds a value of a different kind than the operation expects.
    #[error("wrong kind of value at key {key}")]
    WrongType { key: String },

    /// The value at the key (or hash field) is not an integer.
    #[error("value at {key} is not an integer")]
    NotAnInteger { key: String },

    /// Incrementing the integer at the key (or hash field) would overflow.
    #[error("increment would overflow at {key}")]
    Overflow { key: String },

    /// A pipeline reply did not have the shape its command implies.
    #[error("unexpected reply: expected {expected}")]
    ReplyMismatch { expected: &'static str },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
