//! Storage key naming.
//!
//! Layout, with `:` as the separator:
//!
//! - `<prefix>:<id>` -- the record hash
//! - `<prefix>:<id>:<suffix>` -- per-record auxiliary keys, e.g. the lock
//! - `<prefix>:id` -- the model's identity counter
//!
//! Identities are all digits, so the counter key never collides with a
//! record key. Prefixes may not contain the separator, so keys of two models
//! never collide either.

use crate::error::{ModelError, Result};
use crate::value::RecordId;

/// Separator between key segments.
pub const SEPARATOR: char = ':';

/// Suffix of the per-record lock key.
pub const LOCK_SUFFIX: &str = "_lock";

const ID_COUNTER: &str = "id";

/// Key builder for one model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    prefix: String,
}

impl Key {
    /// Create a key builder; the prefix must be non-empty and free of `:`.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.contains(SEPARATOR) {
            return Err(ModelError::InvalidKeyPrefix(prefix));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The model's identity counter key.
    pub fn id_counter(&self) -> String {
        format!("{}{SEPARATOR}{ID_COUNTER}", self.prefix)
    }

    /// The hash key of one record.
    pub fn record(&self, id: RecordId) -> String {
        format!("{}{SEPARATOR}{id}", self.prefix)
    }

    /// An auxiliary key hanging off one record.
    pub fn record_field(&self, id: RecordId, suffix: &str) -> String {
        format!("{}{SEPARATOR}{id}{SEPARATOR}{suffix}", self.prefix)
    }

    /// The lock key of one record.
    pub fn lock(&self, id: RecordId) -> String {
        self.record_field(id, LOCK_SUFFIX)
    }
}

/// Split a record key into prefix and identity.
///
/// Fails with [`ModelError::BadKey`] unless the key is exactly
/// `<prefix>:<digits>`.
pub fn parse_record_key(key: &str) -> Result<(&str, RecordId)> {
    let bad = || ModelError::BadKey(key.to_string());
    let (prefix, id) = key.split_once(SEPARATOR).ok_or_else(bad)?;
    if prefix.is_empty() {
        return Err(bad());
    }
    let id = RecordId::parse(id).ok_or_else(bad)?;
    Ok((prefix, id))
}
