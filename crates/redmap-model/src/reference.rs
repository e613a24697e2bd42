//! Reference descriptors.
//!
//! A reference field named `owner` is persisted as a single hash field
//! `owner_id` holding the referenced record's identity. The `owner` field
//! itself never appears in the stored hash.

use std::fmt;
use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::validation::{FieldValidator, ValidationError, ValidationReason};
use crate::value::{RecordId, Value};

/// A declared reference from one model to another.
#[derive(Clone)]
pub struct Reference {
    name: String,
    target: String,
    attname: String,
    required: bool,
    default: Option<RecordId>,
    validator: Option<FieldValidator>,
    related_name: Option<String>,
}

impl Reference {
    /// Reference named `name` pointing at the model registered as `target`.
    /// The target does not need to be registered yet.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            attname: format!("{name}_id"),
            name,
            target: target.into(),
            required: false,
            default: None,
            validator: None,
            related_name: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Name of the reverse relation installed on the target model. Defaults
    /// to `<lowercased source model>_set`.
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    /// Override the name of the stored identity field.
    pub fn attname(mut self, attname: impl Into<String>) -> Self {
        self.attname = attname.into();
        self
    }

    pub fn default_id(mut self, id: RecordId) -> Self {
        self.default = Some(id);
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&Value>) -> Vec<ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the target model.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Name of the stored identity field, `<name>_id` by default.
    pub fn stored_name(&self) -> &str {
        &self.attname
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default(&self) -> Option<Value> {
        self.default.map(Value::Id)
    }

    /// The reverse relation name for a given source model.
    pub fn relation_name(&self, source_model: &str) -> String {
        self.related_name
            .clone()
            .unwrap_or_else(|| format!("{}_set", source_model.to_lowercase()))
    }

    /// Normalize an assigned value to an identity.
    ///
    /// Accepts an identity, a non-negative integer, or all-digit text. Any
    /// other value is rejected with [`ModelError::TypeMismatch`].
    pub fn coerce(&self, value: Value) -> Result<Value> {
        let id = match &value {
            Value::Id(id) => Some(*id),
            Value::Int(n) => u64::try_from(*n).ok().map(RecordId::new),
            Value::Text(s) => RecordId::parse(s),
            _ => None,
        };
        id.map(Value::Id).ok_or_else(|| ModelError::TypeMismatch {
            field: self.name.clone(),
            expected: "record or id",
            found: value.kind(),
        })
    }

    /// Parse the stored identity field. Text that is not an identity is kept
    /// as text so that validation can flag it.
    pub fn read_cast(&self, raw: &str) -> Option<Value> {
        if raw.is_empty() {
            return None;
        }
        Some(RecordId::parse(raw).map_or_else(|| Value::Text(raw.to_string()), Value::Id))
    }

    /// Render the identity for storage.
    pub fn store_cast(&self, value: &Value) -> Result<String> {
        match value {
            Value::Id(id) => Ok(id.to_string()),
            other => Err(ModelError::TypeMismatch {
                field: self.attname.clone(),
                expected: "id",
                found: other.kind(),
            }),
        }
    }

    /// Check the stored identity value.
    pub fn validate(&self, value: Option<&Value>) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(v) = value {
            if v.as_id().is_none() {
                errors.push(ValidationError::new(&self.name, ValidationReason::BadReference));
            }
        }

        if self.required && value.is_none() {
            errors.push(ValidationError::new(&self.name, ValidationReason::Required));
        }

        if let Some(validator) = &self.validator {
            errors.extend(validator(&self.name, value));
        }

        errors
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("attname", &self.attname)
            .field("required", &self.required)
            .field("related_name", &self.related_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_name_defaults_to_id_suffix() {
        let r = Reference::new("owner", "User");
        assert_eq!(r.stored_name(), "owner_id");
        assert_eq!(r.target(), "User");
        assert_eq!(Reference::new("o", "U").attname("uid").stored_name(), "uid");
    }

    #[test]
    fn relation_name_default_and_override() {
        let r = Reference::new("owner", "User");
        assert_eq!(r.relation_name("Pet"), "pet_set");
        assert_eq!(r.related_name("pets").relation_name("Pet"), "pets");
    }

    #[test]
    fn coerce_identity_shaped_values() {
        let r = Reference::new("owner", "User");
        let want = Value::Id(RecordId::new(4));
        assert_eq!(r.coerce(Value::Int(4)).unwrap(), want);
        assert_eq!(r.coerce(Value::from("4")).unwrap(), want);
        assert_eq!(r.coerce(want.clone()).unwrap(), want);
        assert!(r.coerce(Value::from("four")).is_err());
        assert!(r.coerce(Value::Int(-1)).is_err());
        assert!(r.coerce(Value::Bool(true)).is_err());
    }

    #[test]
    fn read_and_store() {
        let r = Reference::new("owner", "User");
        assert_eq!(r.read_cast("9"), Some(Value::Id(RecordId::new(9))));
        assert_eq!(r.read_cast("x"), Some(Value::from("x")));
        assert_eq!(r.read_cast(""), None);
        assert_eq!(r.store_cast(&Value::Id(RecordId::new(9))).unwrap(), "9");
        assert!(r.store_cast(&Value::from("9")).is_err());
    }

    #[test]
    fn validation() {
        let r = Reference::new("owner", "User").required();
        assert_eq!(r.validate(None)[0].as_pair(), ("owner", "required"));
        assert_eq!(
            r.validate(Some(&Value::from("x")))[0].as_pair(),
            ("owner", "bad type for reference")
        );
        assert!(r.validate(Some(&Value::Id(RecordId::new(1)))).is_empty());
    }
}
