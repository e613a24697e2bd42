//! Record instances.
//!
//! A [`Record`] is one instance of a registered model: an optional identity
//! plus a cache of typed field values. Field reads go through
//! [`Record::get`]:
//!
//! - a cached value is returned as is;
//! - a new record, or any record in asynchronous mode, yields the field's
//!   default without touching the store;
//! - otherwise the field is read from the record's hash and cached.
//!
//! Once a value is materialized (read, defaulted, or assigned) it stays cached
//! for the life of the record.
//!
//! Saving validates every field, allocates an identity on first save, and
//! replaces the stored hash. Synchronous saves replace it under the
//! per-record lock with a delete-then-write pipeline. Asynchronous saves
//! write the fields directly and take no lock; callers serialize concurrent
//! asynchronous writes to one record themselves.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use redmap_store::{Pipeline, Reply, StoreError};
use tracing::{debug, error};

use crate::context::Context;
use crate::error::{ModelError, Result};
use crate::lock::LockGuard;
use crate::manager::Manager;
use crate::schema::{Field, ModelSchema, Relation};
use crate::validation::ValidationError;
use crate::value::{RecordId, Value};

/// A resolved reference.
///
/// Synchronous contexts fetch the referenced record; asynchronous contexts
/// leave the bare identity so that reading a field never blocks.
#[derive(Clone, Debug, PartialEq)]
pub enum RefValue {
    Record(Box<Record>),
    Id(RecordId),
}

impl RefValue {
    pub fn id(&self) -> Option<RecordId> {
        match self {
            Self::Record(record) => record.id,
            Self::Id(id) => Some(*id),
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(record) => Some(*record),
            Self::Id(_) => None,
        }
    }
}

/// Result of a save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Validation failed; nothing was written.
    Invalid(Vec<ValidationError>),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }

    pub fn errors(&self) -> &[ValidationError] {
        match self {
            Self::Saved => &[],
            Self::Invalid(errors) => errors,
        }
    }
}

/// One record of a registered model.
#[derive(Clone)]
pub struct Record {
    schema: Arc<ModelSchema>,
    ctx: Context,
    id: Option<RecordId>,
    /// Field values keyed by stored name. `None` is a materialized absence.
    values: HashMap<String, Option<Value>>,
    /// Resolved references keyed by reference name.
    resolved: HashMap<String, Option<RefValue>>,
    /// Counter values seen by hydration or increments.
    counters: HashMap<String, i64>,
    errors: Option<Vec<ValidationError>>,
}

impl Record {
    /// A new, unsaved record.
    pub fn new(ctx: Context, schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            ctx,
            id: None,
            values: HashMap::new(),
            resolved: HashMap::new(),
            counters: HashMap::new(),
            errors: None,
        }
    }

    /// A handle on a stored record; its fields are loaded on demand.
    pub fn with_id(ctx: Context, schema: Arc<ModelSchema>, id: RecordId) -> Self {
        let mut record = Self::new(ctx, schema);
        record.id = Some(id);
        record
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The record's identity, or [`ModelError::MissingId`] before the first
    /// save.
    pub fn id(&self) -> Result<RecordId> {
        self.id.ok_or(ModelError::MissingId)
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// The record's hash key.
    pub fn key(&self) -> Result<String> {
        Ok(self.schema.key().record(self.id()?))
    }

    // -----------------------------------------------------------------------
    // Field access
    // -----------------------------------------------------------------------

    fn lookup<'s>(schema: &'s ModelSchema, name: &str) -> Result<Field<'s>> {
        schema
            .field(name)
            .ok_or_else(|| ModelError::unknown_field(schema.name(), name))
    }

    /// Current value of a field, by attribute name, reference name, or a
    /// reference's stored name. References yield their stored identity; use
    /// [`Record::reference`] to resolve them. Counters yield their count.
    pub fn get(&mut self, name: &str) -> Result<Option<Value>> {
        let schema = Arc::clone(&self.schema);
        let field = Self::lookup(&schema, name)?;
        if field.is_counter() {
            return self.counter(name).map(|n| Some(Value::Int(n)));
        }

        let stored = field.stored_name();
        if let Some(cached) = self.values.get(stored) {
            return Ok(cached.clone());
        }

        let value = match self.id {
            Some(id) if !self.ctx.is_async() => self
                .ctx
                .sync_store()?
                .hash_get(&schema.key().record(id), stored)?
                .and_then(|raw| field.read_cast(&raw)),
            _ => field.default(),
        };
        self.values.insert(stored.to_string(), value.clone());
        Ok(value)
    }

    /// The cached value of a field, without touching the store.
    pub fn peek(&self, name: &str) -> Option<&Value> {
        let field = self.schema.field(name)?;
        self.values.get(field.stored_name())?.as_ref()
    }

    pub fn text(&mut self, name: &str) -> Result<Option<String>> {
        Ok(match self.get(name)? {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        })
    }

    pub fn boolean(&mut self, name: &str) -> Result<Option<bool>> {
        Ok(self.get(name)?.and_then(|v| v.as_bool()))
    }

    pub fn integer(&mut self, name: &str) -> Result<Option<i64>> {
        Ok(self.get(name)?.and_then(|v| v.as_int()))
    }

    pub fn float(&mut self, name: &str) -> Result<Option<f64>> {
        Ok(self.get(name)?.and_then(|v| v.as_float()))
    }

    pub fn date(&mut self, name: &str) -> Result<Option<NaiveDate>> {
        Ok(self.get(name)?.and_then(|v| v.as_date()))
    }

    pub fn datetime(&mut self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get(name)?.and_then(|v| v.as_datetime()))
    }

    /// Assign a field.
    ///
    /// Attribute values are taken as given; a value of the wrong type shows
    /// up as a validation error. Reference values must be identity-shaped.
    /// Counters cannot be assigned.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.assign(name, Some(value.into()))
    }

    /// Make a field absent.
    pub fn clear(&mut self, name: &str) -> Result<()> {
        self.assign(name, None)
    }

    fn assign(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        match Self::lookup(&schema, name)? {
            field if field.is_counter() => Err(ModelError::CounterIsReadOnly(name.to_string())),
            Field::Attribute(attribute) => {
                self.values.insert(attribute.name().to_string(), value);
                Ok(())
            }
            Field::Reference(reference) => {
                let value = value.map(|v| reference.coerce(v)).transpose()?;
                self.values.insert(reference.stored_name().to_string(), value);
                self.resolved.remove(reference.name());
                Ok(())
            }
        }
    }

    /// Point a reference at a saved record of the target model.
    pub fn set_reference(&mut self, name: &str, target: &Record) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let reference = schema
            .reference(name)
            .ok_or_else(|| ModelError::unknown_field(schema.name(), name))?;
        if target.model_name() != reference.target() {
            return Err(ModelError::TypeMismatch {
                field: name.to_string(),
                expected: "record or id",
                found: "record of another model",
            });
        }
        let id = target.id()?;
        self.values
            .insert(reference.stored_name().to_string(), Some(Value::Id(id)));
        if self.ctx.is_async() {
            self.resolved.remove(name);
        } else {
            self.resolved.insert(
                name.to_string(),
                Some(RefValue::Record(Box::new(target.clone()))),
            );
        }
        Ok(())
    }

    /// Assign several fields. Names that are not assignable fields of this
    /// model are skipped.
    pub fn update<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in values {
            let name = name.as_ref();
            let assignable = self
                .schema
                .field(name)
                .is_some_and(|field| !field.is_counter());
            if assignable {
                self.set(name, value)?;
            } else {
                debug!(model = self.model_name(), field = name, "update skips unknown field");
            }
        }
        Ok(())
    }

    /// Resolve a reference.
    ///
    /// Synchronous contexts load the referenced record (absent if it no
    /// longer exists) and cache it. Asynchronous contexts return the stored
    /// identity.
    pub fn reference(&mut self, name: &str) -> Result<Option<RefValue>> {
        let schema = Arc::clone(&self.schema);
        let reference = schema
            .reference(name)
            .ok_or_else(|| ModelError::unknown_field(schema.name(), name))?;
        if let Some(resolved) = self.resolved.get(name) {
            return Ok(resolved.clone());
        }

        let Some(id) = self.get(reference.stored_name())?.and_then(|v| v.as_id()) else {
            return Ok(None);
        };
        if self.ctx.is_async() {
            return Ok(Some(RefValue::Id(id)));
        }

        let resolved = Manager::new(&self.ctx, reference.target())?
            .get_by_id(id)?
            .map(|record| RefValue::Record(Box::new(record)));
        self.resolved.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// The stored identity behind a reference.
    pub fn reference_id(&mut self, name: &str) -> Result<Option<RecordId>> {
        let schema = Arc::clone(&self.schema);
        let reference = schema
            .reference(name)
            .ok_or_else(|| ModelError::unknown_field(schema.name(), name))?;
        Ok(self.get(reference.stored_name())?.and_then(|v| v.as_id()))
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    fn check_counter(&self, name: &str) -> Result<()> {
        if self.schema.is_counter(name) {
            Ok(())
        } else {
            Err(ModelError::NotACounter(name.to_string()))
        }
    }

    /// Current value of a counter. Always 0 for a new record. Synchronous
    /// contexts read the store; asynchronous ones report the last value seen.
    pub fn counter(&self, name: &str) -> Result<i64> {
        self.check_counter(name)?;
        let Some(id) = self.id else {
            return Ok(0);
        };
        if self.ctx.is_async() {
            return Ok(self.counters.get(name).copied().unwrap_or(0));
        }
        let raw = self
            .ctx
            .sync_store()?
            .hash_get(&self.schema.key().record(id), name)?;
        Ok(raw.and_then(|raw| raw.parse().ok()).unwrap_or(0))
    }

    /// Atomically add `delta` to a counter and return the new value.
    ///
    /// Takes the record lock, so an increment never lands between a
    /// concurrent save's counter snapshot and its rewrite of the hash.
    pub fn incr(&mut self, name: &str, delta: i64) -> Result<i64> {
        self.check_counter(name)?;
        let id = self.id()?;
        let store = Arc::clone(self.ctx.sync_store()?);
        let guard = LockGuard::acquire(
            &*store,
            self.schema.key().lock(id),
            &self.ctx.config().lock,
        )?;
        let value = store.hash_increment(&self.schema.key().record(id), name, delta)?;
        guard.release()?;

        debug!(model = self.model_name(), %id, counter = name, value, "counter changed");
        self.counters.insert(name.to_string(), value);
        Ok(value)
    }

    pub fn decr(&mut self, name: &str, delta: i64) -> Result<i64> {
        self.incr(name, negate(name, delta)?)
    }

    pub async fn incr_async(&mut self, name: &str, delta: i64) -> Result<i64> {
        self.check_counter(name)?;
        let id = self.id()?;
        let store = Arc::clone(self.ctx.async_store()?);
        let key = self.schema.key().record(id);
        let value = store
            .hash_increment(&key, name, delta)
            .await
            .map_err(|e| self.async_failure("incr", &key, e))?;
        debug!(model = self.model_name(), %id, counter = name, value, "counter changed");
        self.counters.insert(name.to_string(), value);
        Ok(value)
    }

    pub async fn decr_async(&mut self, name: &str, delta: i64) -> Result<i64> {
        let delta = negate(name, delta)?;
        self.incr_async(name, delta).await
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate every field, then run the model's validation hook. All
    /// failures are collected and remembered for [`Record::errors`].
    pub fn validate_all(&mut self) -> Result<Vec<ValidationError>> {
        let schema = Arc::clone(&self.schema);
        let mut errors = Vec::new();

        for attribute in schema.attributes().values().filter(|a| !a.is_counter()) {
            let value = self.get(attribute.name())?;
            errors.extend(attribute.validate(value.as_ref()));
        }
        for reference in schema.references().values() {
            let value = self.get(reference.stored_name())?;
            errors.extend(reference.validate(value.as_ref()));
        }
        if let Some(validator) = schema.validator() {
            errors.extend(validator(self));
        }

        self.errors = Some(errors.clone());
        Ok(errors)
    }

    pub fn is_valid(&mut self) -> Result<bool> {
        Ok(self.validate_all()?.is_empty())
    }

    /// Errors from the last validation, validating first if needed.
    pub fn errors(&mut self) -> Result<Vec<ValidationError>> {
        match &self.errors {
            Some(errors) => Ok(errors.clone()),
            None => self.validate_all(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Apply automatic timestamps and render every present, non-counter
    /// field for storage.
    fn payload(&mut self, now: DateTime<Utc>, is_new: bool) -> Result<BTreeMap<String, String>> {
        let schema = Arc::clone(&self.schema);
        let mut fields = BTreeMap::new();

        for attribute in schema.attributes().values().filter(|a| !a.is_counter()) {
            if let Some(value) = attribute.auto_value(now, is_new) {
                self.values
                    .insert(attribute.name().to_string(), Some(value));
            }
            if let Some(value) = self.get(attribute.name())? {
                fields.insert(attribute.name().to_string(), attribute.store_cast(&value)?);
            }
        }
        for reference in schema.references().values() {
            if let Some(value) = self.get(reference.stored_name())? {
                fields.insert(
                    reference.stored_name().to_string(),
                    reference.store_cast(&value)?,
                );
            }
        }
        Ok(fields)
    }

    fn allocated(&mut self, value: i64) -> Result<RecordId> {
        let id = u64::try_from(value).map(RecordId::new).map_err(|_| {
            StoreError::NotAnInteger {
                key: self.schema.key().id_counter(),
            }
        })?;
        debug!(model = self.model_name(), %id, "identity allocated");
        self.id = Some(id);
        Ok(id)
    }

    /// Validate and write the record.
    ///
    /// A new record first gets an identity from the model's id counter. The
    /// stored hash is then replaced under the record lock. Counter fields are
    /// carried over from the stored hash; the record never writes them.
    pub fn save(&mut self) -> Result<SaveOutcome> {
        let store = Arc::clone(self.ctx.sync_store()?);
        let errors = self.validate_all()?;
        if !errors.is_empty() {
            debug!(model = self.model_name(), errors = errors.len(), "save rejected");
            return Ok(SaveOutcome::Invalid(errors));
        }

        let is_new = self.is_new();
        let id = match self.id {
            Some(id) => id,
            None => {
                let next = store.increment(&self.schema.key().id_counter())?;
                self.allocated(next)?
            }
        };
        let key = self.schema.key().record(id);

        let guard = LockGuard::acquire(
            &*store,
            self.schema.key().lock(id),
            &self.ctx.config().lock,
        )?;
        let mut fields = self.payload(Utc::now(), is_new)?;

        let counters = self.schema.counters().to_vec();
        if !counters.is_empty() {
            let current = store.hash_get_multi(&key, &counters)?;
            for (name, value) in counters.into_iter().zip(current) {
                if let Some(value) = value {
                    fields.insert(name, value);
                }
            }
        }

        let mut pipeline = Pipeline::new();
        pipeline
            .delete(key.clone())
            .hash_set_multi(key.clone(), fields);
        store.execute(&pipeline)?;
        guard.release()?;

        debug!(model = self.model_name(), key = %key, "record saved");
        Ok(SaveOutcome::Saved)
    }

    /// Validate and write the record without blocking.
    ///
    /// No lock is taken and the stored hash is updated in place: fields are
    /// written, never deleted, and counters are left alone.
    pub async fn save_async(&mut self) -> Result<SaveOutcome> {
        let store = Arc::clone(self.ctx.async_store()?);
        let errors = self.validate_all()?;
        if !errors.is_empty() {
            debug!(model = self.model_name(), errors = errors.len(), "save rejected");
            return Ok(SaveOutcome::Invalid(errors));
        }

        let is_new = self.is_new();
        let id = match self.id {
            Some(id) => id,
            None => {
                let counter = self.schema.key().id_counter();
                let next = store
                    .increment(&counter)
                    .await
                    .map_err(|e| self.async_failure("save", &counter, e))?;
                self.allocated(next)?
            }
        };
        let fields = self.payload(Utc::now(), is_new)?;
        let key = self.schema.key().record(id);
        store
            .hash_set_multi(&key, &fields)
            .await
            .map_err(|e| self.async_failure("save", &key, e))?;

        debug!(model = self.model_name(), key = %key, "record saved");
        Ok(SaveOutcome::Saved)
    }

    /// Remove the record's hash. The identity is not reused and counters,
    /// being part of the hash, go with it. Returns whether the hash existed.
    pub fn delete(&self) -> Result<bool> {
        let key = self.key()?;
        let mut pipeline = Pipeline::new();
        pipeline.delete(key.clone());
        let replies = self.ctx.sync_store()?.execute(&pipeline)?;
        debug!(model = self.model_name(), key = %key, "record deleted");
        first_bool(replies)
    }

    pub async fn delete_async(&self) -> Result<bool> {
        let key = self.key()?;
        let store = Arc::clone(self.ctx.async_store()?);
        let mut pipeline = Pipeline::new();
        pipeline.delete(key.clone());
        let replies = store
            .execute(&pipeline)
            .await
            .map_err(|e| self.async_failure("delete", &key, e))?;
        debug!(model = self.model_name(), key = %key, "record deleted");
        first_bool(replies)
    }

    /// Log a failed asynchronous store request before handing it back.
    fn async_failure(&self, operation: &'static str, key: &str, e: StoreError) -> ModelError {
        error!(model = self.model_name(), key, operation, error = %e, "store request failed");
        e.into()
    }

    /// Fill the record from raw stored text, e.g. the result of a batch
    /// read. An `"id"` entry sets the identity; unknown names are ignored.
    pub fn hydrate(&mut self, raw: &BTreeMap<String, String>) {
        let schema = Arc::clone(&self.schema);
        for (name, text) in raw {
            if name == "id" {
                if let Some(id) = RecordId::parse(text) {
                    self.id = Some(id);
                }
                continue;
            }
            match schema.field(name) {
                Some(field) if field.is_counter() => {
                    if let Ok(n) = text.parse() {
                        self.counters.insert(name.clone(), n);
                    }
                }
                Some(field) => {
                    self.values
                        .insert(field.stored_name().to_string(), field.read_cast(text));
                    if let Field::Reference(reference) = field {
                        self.resolved.remove(reference.name());
                    }
                }
                None => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Every attribute and reference with its current value. References map
    /// to their stored identity.
    pub fn attributes_map(&mut self) -> Result<BTreeMap<String, Option<Value>>> {
        let schema = Arc::clone(&self.schema);
        let mut map = BTreeMap::new();
        for name in schema.attributes().keys() {
            map.insert(name.clone(), self.get(name)?);
        }
        for (name, reference) in schema.references() {
            map.insert(name.clone(), self.get(reference.stored_name())?);
        }
        Ok(map)
    }

    /// JSON object of every field plus `"id"`.
    pub fn to_json(&mut self) -> Result<serde_json::Value> {
        use serde_json::Value as Json;

        let mut object = serde_json::Map::new();
        for (name, value) in self.attributes_map()? {
            object.insert(name, value.map_or(Json::Null, |v| v.to_json()));
        }
        object.insert(
            "id".to_string(),
            self.id.map_or(Json::Null, |id| Json::String(id.to_string())),
        );
        Ok(Json::Object(object))
    }

    // -----------------------------------------------------------------------
    // Reverse relations
    // -----------------------------------------------------------------------

    fn relation_manager(&self, name: &str) -> Result<(Relation, Manager)> {
        let relation = self
            .schema
            .relation(name)
            .ok_or_else(|| ModelError::UnknownRelation {
                model: self.model_name().to_string(),
                relation: name.to_string(),
            })?;
        let manager = Manager::new(&self.ctx, &relation.source)?;
        Ok((relation, manager))
    }

    /// Records of another model that reference this one through the named
    /// reverse relation.
    pub fn related(&self, name: &str) -> Result<Vec<Record>> {
        let (relation, manager) = self.relation_manager(name)?;
        manager.filter_by_reference(&relation.stored_name, self.id()?)
    }

    /// Like [`Record::related`]; store failures yield an empty list.
    pub async fn related_async(&self, name: &str) -> Result<Vec<Record>> {
        let (relation, manager) = self.relation_manager(name)?;
        let id = self.id()?;
        Ok(manager
            .filter_by_reference_async(&relation.stored_name, id)
            .await)
    }
}

fn negate(counter: &str, delta: i64) -> Result<i64> {
    delta
        .checked_neg()
        .ok_or_else(|| ModelError::CounterOverflow(counter.to_string()))
}

fn first_bool(replies: Vec<Reply>) -> Result<bool> {
    match replies.into_iter().next() {
        Some(reply) => Ok(reply.into_bool()?),
        None => Ok(false),
    }
}

impl PartialEq for Record {
    /// Saved records are equal when they have the same model and identity.
    /// New records compare by their cached values.
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && match (self.id, other.id) {
                (Some(a), Some(b)) => a == b,
                (None, None) => self.values == other.values,
                _ => false,
            }
    }
}

impl Record {
    fn sorted_values(&self) -> BTreeMap<&str, &Value> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.as_str(), v)))
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "<{}", self.schema.key().record(id))?,
            None => write!(f, "<{} (new)", self.schema.name())?,
        }
        for (name, value) in self.sorted_values() {
            write!(f, " {name}={value}")?;
        }
        f.write_str(">")
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.schema.name())
            .field("id", &self.id)
            .field("values", &self.sorted_values())
            .field("counters", &self.counters)
            .finish()
    }
}
