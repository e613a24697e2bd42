//! Validation results.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Why a field failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValidationReason {
    Required,
    BadType,
    ExceedsMaxLength,
    BadReference,
    /// A code produced by a custom validator.
    Custom(String),
}

impl ValidationReason {
    /// The short code for this reason, e.g. `"required"`.
    pub fn code(&self) -> &str {
        match self {
            Self::Required => "required",
            Self::BadType => "bad type",
            Self::ExceedsMaxLength => "exceeds max length",
            Self::BadReference => "bad type for reference",
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One `(field, reason)` validation failure.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValidationError {
    pub field: String,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: ValidationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }

    /// A failure with a custom code.
    pub fn custom(field: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Custom(code.into()))
    }

    /// The `(field, code)` pair.
    pub fn as_pair(&self) -> (&str, &str) {
        (&self.field, self.reason.code())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Custom per-field check: receives the field name and its current value.
pub type FieldValidator = Arc<dyn Fn(&str, Option<&Value>) -> Vec<ValidationError> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(ValidationReason::Required.code(), "required");
        assert_eq!(ValidationReason::BadReference.to_string(), "bad type for reference");
        let e = ValidationError::custom("name", "cannot be Nemo");
        assert_eq!(e.as_pair(), ("name", "cannot be Nemo"));
        assert_eq!(e.to_string(), "name: cannot be Nemo");
    }
}
