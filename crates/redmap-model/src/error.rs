use redmap_store::StoreError;

/// Errors from record, schema and manager operations.
///
/// Validation failures are not errors: they are returned as
/// [`crate::ValidationError`] values from `save` and `validate_all`.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The record has no identity yet (it has never been saved).
    #[error("record has no id")]
    MissingId,

    /// A value of the wrong runtime type reached a strictly typed field.
    #[error("field {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The key does not name a declared model or its id is not numeric.
    #[error("bad key: {0}")]
    BadKey(String),

    /// No model is registered under this name.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A model is already registered under this name or key prefix.
    #[error("model already registered: {0}")]
    DuplicateModel(String),

    /// The key prefix is empty or contains the key separator.
    #[error("invalid key prefix: {0:?}")]
    InvalidKeyPrefix(String),

    #[error("model {model} has no field {field}")]
    UnknownField { model: String, field: String },

    #[error("model {model} has no relation {relation}")]
    UnknownRelation { model: String, relation: String },

    #[error("{0} is not a counter")]
    NotACounter(String),

    /// The requested change cannot be represented as a 64-bit count.
    #[error("counter {0} would overflow")]
    CounterOverflow(String),

    /// Counters change only through `incr`/`decr`.
    #[error("can't set counter {0}")]
    CounterIsReadOnly(String),

    /// A blocking operation was called on an asynchronous context, or the
    /// other way round.
    #[error("operation requires {expected} mode")]
    ModeMismatch { expected: &'static str },

    /// The record lock could not be acquired within the configured attempts.
    #[error("could not lock {key} after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModelError {
    pub(crate) fn unknown_field(model: &str, field: &str) -> Self {
        Self::UnknownField {
            model: model.to_string(),
            field: field.to_string(),
        }
    }
}

/// Result alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
