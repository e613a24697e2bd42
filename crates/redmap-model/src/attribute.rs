//! Typed attribute descriptors.
//!
//! An [`Attribute`] describes one persisted field: its kind, whether it is
//! required, its default, and any custom validator. It converts values in both
//! directions: [`Attribute::store_cast`] renders a value as hash-field text and
//! [`Attribute::read_cast`] parses that text back. Descriptors are shared by
//! every record of a model; per-record values live in the record's cache.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::validation::{FieldValidator, ValidationError, ValidationReason};
use crate::value::{date_to_epoch, Value};

/// The kind of a persisted attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    /// Stored as `"1"` / `"0"`.
    Boolean,
    Integer,
    Float,
    /// Stored as epoch seconds of midnight UTC.
    Date,
    /// Stored as epoch seconds.
    DateTime,
    /// Integer changed only by atomic increments, never by `save`.
    Counter,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Counter => "counter",
        }
    }

    /// Whether a value's runtime type is acceptable for this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Text, Value::Text(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Integer | Self::Counter, Value::Int(_))
                | (Self::Float, Value::Float(_))
                | (Self::Date, Value::Date(_) | Value::DateTime(_))
                | (Self::DateTime, Value::DateTime(_))
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A declared, typed model attribute.
#[derive(Clone)]
pub struct Attribute {
    name: String,
    kind: FieldKind,
    required: bool,
    default: Option<Value>,
    validator: Option<FieldValidator>,
    max_length: Option<usize>,
    auto_now: bool,
    auto_now_add: bool,
}

impl Attribute {
    /// An attribute of the given kind with no constraints.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: (kind == FieldKind::Counter).then_some(Value::Int(0)),
            validator: None,
            max_length: None,
            auto_now: false,
            auto_now_add: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn counter(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Counter)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used for new records and in asynchronous mode. A counter's
    /// default is always 0 unless one is given.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&Value>) -> Vec<ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Maximum length of a text value, in characters. Text is unbounded
    /// unless this is set.
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Refresh a date/datetime to the current time on every save.
    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    /// Set a date/datetime to the current time when the record is first saved.
    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_counter(&self) -> bool {
        self.kind == FieldKind::Counter
    }

    pub fn default(&self) -> Option<Value> {
        self.default.clone()
    }

    /// Parse stored text into a value. Malformed text yields `None`.
    pub fn read_cast(&self, raw: &str) -> Option<Value> {
        match self.kind {
            FieldKind::Text => Some(Value::Text(raw.to_string())),
            FieldKind::Boolean => raw.parse::<i64>().ok().map(|n| Value::Bool(n != 0)),
            FieldKind::Integer | FieldKind::Counter => raw.parse().ok().map(Value::Int),
            FieldKind::Float => raw.parse().ok().map(Value::Float),
            FieldKind::Date => epoch(raw).map(|dt| Value::Date(dt.date_naive())),
            FieldKind::DateTime => epoch(raw).map(Value::DateTime),
        }
    }

    /// Render a value as stored text.
    ///
    /// Fails with [`ModelError::TypeMismatch`] if the value's type is not
    /// acceptable for this attribute's kind. Nothing is coerced.
    pub fn store_cast(&self, value: &Value) -> Result<String> {
        let text = match (self.kind, value) {
            (FieldKind::Text, Value::Text(s)) => s.clone(),
            (FieldKind::Boolean, Value::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
            (FieldKind::Integer | FieldKind::Counter, Value::Int(n)) => n.to_string(),
            (FieldKind::Float, Value::Float(x)) => x.to_string(),
            (FieldKind::Date, Value::Date(d)) => date_to_epoch(*d).to_string(),
            (FieldKind::Date, Value::DateTime(dt)) => date_to_epoch(dt.date_naive()).to_string(),
            (FieldKind::DateTime, Value::DateTime(dt)) => dt.timestamp().to_string(),
            _ => {
                return Err(ModelError::TypeMismatch {
                    field: self.name.clone(),
                    expected: self.kind.name(),
                    found: value.kind(),
                })
            }
        };
        Ok(text)
    }

    /// Check a value against this attribute's rules. Every failure is
    /// reported; an empty list means the value is valid.
    pub fn validate(&self, value: Option<&Value>) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(v) = value {
            if !self.kind.accepts(v) {
                errors.push(ValidationError::new(&self.name, ValidationReason::BadType));
            }
        }

        if self.required && value.map_or(true, Value::is_blank) {
            errors.push(ValidationError::new(&self.name, ValidationReason::Required));
        }

        if let Some(validator) = &self.validator {
            errors.extend(validator(&self.name, value));
        }

        if let (Some(Value::Text(s)), Some(max)) = (value, self.max_length) {
            if s.chars().count() > max {
                errors.push(ValidationError::new(
                    &self.name,
                    ValidationReason::ExceedsMaxLength,
                ));
            }
        }

        errors
    }

    /// The value a save should assign before writing, if this is a date or
    /// datetime attribute with `auto_now`, or `auto_now_add` on a new record.
    pub fn auto_value(&self, now: DateTime<Utc>, is_new: bool) -> Option<Value> {
        if !(self.auto_now || (self.auto_now_add && is_new)) {
            return None;
        }
        match self.kind {
            FieldKind::Date => Some(Value::Date(now.date_naive())),
            FieldKind::DateTime => Some(Value::DateTime(now)),
            _ => None,
        }
    }
}

fn epoch(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use proptest::prelude::*;

    // -----------------------------------------------------------------------
    // Casting
    // -----------------------------------------------------------------------

    #[test]
    fn boolean_is_stored_as_digit() {
        let a = Attribute::boolean("active");
        assert_eq!(a.store_cast(&Value::Bool(true)).unwrap(), "1");
        assert_eq!(a.store_cast(&Value::Bool(false)).unwrap(), "0");
        assert_eq!(a.read_cast("1"), Some(Value::Bool(true)));
        assert_eq!(a.read_cast("0"), Some(Value::Bool(false)));
        assert_eq!(a.read_cast("yes"), None);
    }

    #[test]
    fn datetime_is_epoch_seconds() {
        let a = Attribute::datetime("created");
        let dt = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let stored = a.store_cast(&Value::DateTime(dt)).unwrap();
        assert_eq!(stored, dt.timestamp().to_string());
        assert_eq!(a.read_cast(&stored), Some(Value::DateTime(dt)));
    }

    #[test]
    fn date_accepts_datetime_and_drops_time() {
        let a = Attribute::date("day");
        let dt = Utc.with_ymd_and_hms(2021, 6, 1, 23, 59, 59).unwrap();
        let stored = a.store_cast(&Value::DateTime(dt)).unwrap();
        assert_eq!(
            a.read_cast(&stored),
            Some(Value::Date(NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()))
        );
    }

    #[test]
    fn malformed_dates_read_as_absent() {
        assert_eq!(Attribute::date("d").read_cast("not-a-number"), None);
        assert_eq!(Attribute::datetime("d").read_cast(""), None);
    }

    #[test]
    fn strict_store_cast_rejects_wrong_type() {
        let a = Attribute::datetime("created");
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let err = a.store_cast(&Value::Date(d)).unwrap_err();
        assert!(matches!(
            err,
            ModelError::TypeMismatch {
                expected: "datetime",
                found: "date",
                ..
            }
        ));
        assert!(Attribute::integer("n").store_cast(&Value::from("3")).is_err());
    }

    proptest! {
        #[test]
        fn text_roundtrip(s in ".*") {
            let a = Attribute::text("t");
            let v = Value::Text(s);
            prop_assert_eq!(a.read_cast(&a.store_cast(&v).unwrap()), Some(v));
        }

        #[test]
        fn integer_roundtrip(n in any::<i64>()) {
            let a = Attribute::integer("n");
            let v = Value::Int(n);
            prop_assert_eq!(a.read_cast(&a.store_cast(&v).unwrap()), Some(v));
        }

        #[test]
        fn float_roundtrip(x in -1.0e12f64..1.0e12) {
            let a = Attribute::float("x");
            let v = Value::Float(x);
            prop_assert_eq!(a.read_cast(&a.store_cast(&v).unwrap()), Some(v));
        }

        #[test]
        fn datetime_roundtrip_to_the_second(secs in 0i64..4_000_000_000) {
            let a = Attribute::datetime("t");
            let dt = DateTime::from_timestamp(secs, 0).unwrap();
            let v = Value::DateTime(dt);
            prop_assert_eq!(a.read_cast(&a.store_cast(&v).unwrap()), Some(v));
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn required_missing_or_blank() {
        let a = Attribute::text("name").required();
        assert_eq!(
            a.validate(None),
            vec![ValidationError::new("name", ValidationReason::Required)]
        );
        assert_eq!(a.validate(Some(&Value::from("   "))).len(), 1);
        assert!(a.validate(Some(&Value::from("ok"))).is_empty());
    }

    #[test]
    fn false_and_zero_satisfy_required() {
        assert!(Attribute::boolean("b")
            .required()
            .validate(Some(&Value::Bool(false)))
            .is_empty());
        assert!(Attribute::integer("n")
            .required()
            .validate(Some(&Value::Int(0)))
            .is_empty());
    }

    #[test]
    fn bad_type_reported() {
        let errors = Attribute::integer("n").validate(Some(&Value::from("3")));
        assert_eq!(errors[0].as_pair(), ("n", "bad type"));
    }

    #[test]
    fn max_length_counts_chars() {
        let a = Attribute::text("t").max_length(3);
        assert!(a.validate(Some(&Value::from("äöü"))).is_empty());
        assert_eq!(
            a.validate(Some(&Value::from("abcd")))[0].reason,
            ValidationReason::ExceedsMaxLength
        );
    }

    #[test]
    fn text_is_unbounded_without_max_length() {
        let long = "x".repeat(10_000);
        assert!(Attribute::text("t").validate(Some(&Value::from(long))).is_empty());
    }

    #[test]
    fn custom_validator_errors_are_collected() {
        let a = Attribute::text("name").required().validator(|field, value| {
            match value.and_then(Value::as_text) {
                Some("Nemo") => vec![ValidationError::custom(field, "cannot be Nemo")],
                _ => Vec::new(),
            }
        });
        let errors = a.validate(Some(&Value::from("Nemo")));
        assert_eq!(errors, vec![ValidationError::custom("name", "cannot be Nemo")]);

        // Not fail-fast: required and custom failures both show up.
        let a = Attribute::text("name")
            .required()
            .validator(|field, _| vec![ValidationError::custom(field, "always")]);
        assert_eq!(a.validate(None).len(), 2);
    }

    // -----------------------------------------------------------------------
    // Defaults and auto timestamps
    // -----------------------------------------------------------------------

    #[test]
    fn counter_defaults_to_zero() {
        assert_eq!(Attribute::counter("hits").default(), Some(Value::Int(0)));
        assert_eq!(Attribute::integer("n").default(), None);
        assert_eq!(
            Attribute::integer("n").default_value(5).default(),
            Some(Value::Int(5))
        );
    }

    #[test]
    fn auto_timestamps() {
        let now = Utc.with_ymd_and_hms(2022, 2, 2, 2, 2, 2).unwrap();
        let created = Attribute::datetime("created").auto_now_add();
        let updated = Attribute::datetime("updated").auto_now();
        let day = Attribute::date("day").auto_now();

        assert_eq!(created.auto_value(now, true), Some(Value::DateTime(now)));
        assert_eq!(created.auto_value(now, false), None);
        assert_eq!(updated.auto_value(now, false), Some(Value::DateTime(now)));
        assert_eq!(
            day.auto_value(now, false),
            Some(Value::Date(now.date_naive()))
        );
        assert_eq!(Attribute::text("t").auto_now().auto_value(now, true), None);
    }
}
