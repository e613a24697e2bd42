//! Per-model batch reads.
//!
//! A [`Manager`] fetches records of one model. The synchronous lookups
//! return store failures as errors. The asynchronous ones pipeline their
//! reads into one round trip and never fail: a store failure is logged and
//! shows up as an empty or absent result, the same as "not found". A batch
//! either succeeds as a whole or comes back empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use redmap_store::{AsyncKvStore, Command, Pipeline, RangeLimit, Reply, ScoreBound, StoreResult};
use tracing::{debug, error};

use crate::context::Context;
use crate::error::{ModelError, Result};
use crate::key::parse_record_key;
use crate::record::Record;
use crate::schema::ModelSchema;
use crate::value::RecordId;

/// Batch reads for one registered model.
#[derive(Clone)]
pub struct Manager {
    schema: Arc<ModelSchema>,
    ctx: Context,
}

impl Manager {
    /// The manager of a registered model.
    pub fn new(ctx: &Context, model: &str) -> Result<Self> {
        let schema = ctx.registry().require(model)?;
        Ok(Self::for_schema(ctx.clone(), schema))
    }

    pub fn for_schema(ctx: Context, schema: Arc<ModelSchema>) -> Self {
        Self { schema, ctx }
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// A new, unsaved record of this model.
    pub fn create(&self) -> Record {
        Record::new(self.ctx.clone(), Arc::clone(&self.schema))
    }

    /// Reconstruct a record from its hash key, e.g. `"Person:12"`.
    ///
    /// An unknown prefix or a non-numeric identity is a
    /// [`ModelError::BadKey`]. A well-formed key whose record does not exist
    /// yields `Ok(None)`.
    pub fn from_key(ctx: &Context, key: &str) -> Result<Option<Record>> {
        let (prefix, id) = parse_record_key(key)?;
        let schema = ctx
            .registry()
            .by_prefix(prefix)
            .ok_or_else(|| ModelError::BadKey(key.to_string()))?;
        Self::for_schema(ctx.clone(), schema).get_by_id(id)
    }

    // -----------------------------------------------------------------------
    // Synchronous
    // -----------------------------------------------------------------------

    pub fn exists(&self, id: RecordId) -> Result<bool> {
        let store = self.ctx.sync_store()?;
        Ok(store.exists(&self.schema.key().record(id))?)
    }

    /// A handle on a stored record, or `None` if its hash does not exist.
    /// Fields are loaded lazily on first access.
    pub fn get_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        if !self.exists(id)? {
            return Ok(None);
        }
        Ok(Some(Record::with_id(
            self.ctx.clone(),
            Arc::clone(&self.schema),
            id,
        )))
    }

    /// Records whose stored reference field `stored_name` holds `target`.
    ///
    /// There is no index, so every identity allocated so far is read in one
    /// pipeline and filtered.
    pub fn filter_by_reference(&self, stored_name: &str, target: RecordId) -> Result<Vec<Record>> {
        self.check_field(stored_name)?;
        let store = self.ctx.sync_store()?;
        let last = store.get(&self.schema.key().id_counter())?;
        let (ids, fields, pipeline) = self.scan(last);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let replies = store.execute(&pipeline)?;
        Ok(self.referencing(&ids, &fields, replies, stored_name, target)?)
    }

    // -----------------------------------------------------------------------
    // Asynchronous
    // -----------------------------------------------------------------------

    fn async_store(&self, operation: &'static str) -> Option<Arc<dyn AsyncKvStore>> {
        match self.ctx.async_store() {
            Ok(store) => Some(Arc::clone(store)),
            Err(e) => {
                error!(model = self.schema.name(), operation, error = %e, "batch read refused");
                None
            }
        }
    }

    fn log_failure(&self, operation: &'static str, error: impl std::fmt::Display) {
        error!(model = self.schema.name(), operation, error = %error, "batch read failed");
    }

    pub async fn exists_async(&self, id: RecordId) -> bool {
        let Some(store) = self.async_store("exists") else {
            return false;
        };
        match store.exists(&self.schema.key().record(id)).await {
            Ok(found) => found,
            Err(e) => {
                self.log_failure("exists", e);
                false
            }
        }
    }

    /// Load one record with a single multi-field read. A record whose
    /// fields are all missing or empty counts as not found.
    pub async fn get_by_id_async(&self, id: RecordId) -> Option<Record> {
        let store = self.async_store("get_by_id")?;
        let fields = self.schema.stored_fields();
        match store
            .hash_get_multi(&self.schema.key().record(id), &fields)
            .await
        {
            Ok(values) => self.hydrate_row(id, &fields, values),
            Err(e) => {
                self.log_failure("get_by_id", e);
                None
            }
        }
    }

    /// Load several records in one pipeline. Missing records are skipped;
    /// the rest keep the order of `ids`.
    pub async fn get_by_ids_async(&self, ids: &[RecordId]) -> Vec<Record> {
        let Some(store) = self.async_store("get_by_ids") else {
            return Vec::new();
        };
        if ids.is_empty() {
            return Vec::new();
        }

        let fields = self.schema.stored_fields();
        let mut pipeline = Pipeline::new();
        for id in ids {
            pipeline.hash_get_multi(self.schema.key().record(*id), fields.clone());
        }

        let replies = match store.execute(&pipeline).await {
            Ok(replies) => replies,
            Err(e) => {
                self.log_failure("get_by_ids", e);
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(ids.len());
        for (id, reply) in ids.iter().zip(replies) {
            match reply.into_values() {
                Ok(values) => records.extend(self.hydrate_row(*id, &fields, values)),
                Err(e) => {
                    self.log_failure("get_by_ids", e);
                    return Vec::new();
                }
            }
        }
        debug!(
            model = self.schema.name(),
            requested = ids.len(),
            found = records.len(),
            "batch read"
        );
        records
    }

    /// Members of a sorted set with scores in `[start, end]`, unbounded where
    /// `None`. With `reverse` the highest scores come first. `count` keeps
    /// only the first members.
    pub async fn get_sort_list_async(
        &self,
        key: &str,
        start: Option<f64>,
        end: Option<f64>,
        count: Option<usize>,
        reverse: bool,
    ) -> Vec<String> {
        let (from, to) = if reverse {
            (ScoreBound::upper(end), ScoreBound::lower(start))
        } else {
            (ScoreBound::lower(start), ScoreBound::upper(end))
        };
        let mut pipeline = Pipeline::new();
        pipeline.push(Command::RangeByScore {
            key: key.to_string(),
            from,
            to,
            limit: count.map(RangeLimit::first),
            reversed: reverse,
        });
        self.members("get_sort_list", pipeline)
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Members of one set.
    pub async fn get_set_async(&self, key: &str) -> Vec<String> {
        let mut pipeline = Pipeline::new();
        pipeline.set_members(key);
        self.members("get_set", pipeline)
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Members of several sets, one list per key, in order.
    pub async fn get_sets_async(&self, keys: &[String]) -> Vec<Vec<String>> {
        let mut pipeline = Pipeline::new();
        for key in keys {
            pipeline.set_members(key.as_str());
        }
        self.members("get_sets", pipeline).await
    }

    async fn members(&self, operation: &'static str, pipeline: Pipeline) -> Vec<Vec<String>> {
        let Some(store) = self.async_store(operation) else {
            return Vec::new();
        };
        if pipeline.is_empty() {
            return Vec::new();
        }
        let result = match store.execute(&pipeline).await {
            Ok(replies) => replies
                .into_iter()
                .map(Reply::into_members)
                .collect::<StoreResult<Vec<_>>>(),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            self.log_failure(operation, e);
            Vec::new()
        })
    }

    /// Like [`Manager::filter_by_reference`], under the batch error contract.
    pub async fn filter_by_reference_async(
        &self,
        stored_name: &str,
        target: RecordId,
    ) -> Vec<Record> {
        if let Err(e) = self.check_field(stored_name) {
            self.log_failure("filter_by_reference", e);
            return Vec::new();
        }
        let Some(store) = self.async_store("filter_by_reference") else {
            return Vec::new();
        };

        let last = match store.get(&self.schema.key().id_counter()).await {
            Ok(last) => last,
            Err(e) => {
                self.log_failure("filter_by_reference", e);
                return Vec::new();
            }
        };
        let (ids, fields, pipeline) = self.scan(last);
        if ids.is_empty() {
            return Vec::new();
        }

        let result = match store.execute(&pipeline).await {
            Ok(replies) => self.referencing(&ids, &fields, replies, stored_name, target),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            self.log_failure("filter_by_reference", e);
            Vec::new()
        })
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    fn check_field(&self, stored_name: &str) -> Result<()> {
        match self.schema.field(stored_name) {
            Some(_) => Ok(()),
            None => Err(ModelError::unknown_field(self.schema.name(), stored_name)),
        }
    }

    /// Plan a read of every identity up to the id counter value `last`.
    fn scan(&self, last: Option<String>) -> (Vec<RecordId>, Vec<String>, Pipeline) {
        let last: u64 = last.and_then(|s| s.parse().ok()).unwrap_or(0);
        let ids: Vec<RecordId> = (1..=last).map(RecordId::new).collect();
        let fields = self.schema.stored_fields();
        let mut pipeline = Pipeline::new();
        for id in &ids {
            pipeline.hash_get_multi(self.schema.key().record(*id), fields.clone());
        }
        (ids, fields, pipeline)
    }

    fn referencing(
        &self,
        ids: &[RecordId],
        fields: &[String],
        replies: Vec<Reply>,
        stored_name: &str,
        target: RecordId,
    ) -> StoreResult<Vec<Record>> {
        let position = fields.iter().position(|f| f == stored_name);
        let wanted = target.to_string();
        let mut records = Vec::new();
        for (id, reply) in ids.iter().zip(replies) {
            let values = reply.into_values()?;
            let hit = position
                .and_then(|p| values.get(p))
                .and_then(|v| v.as_deref())
                == Some(wanted.as_str());
            if hit {
                records.extend(self.hydrate_row(*id, fields, values));
            }
        }
        Ok(records)
    }

    /// Build a record from positional field values, or `None` if every value
    /// is missing or empty.
    fn hydrate_row(
        &self,
        id: RecordId,
        fields: &[String],
        values: Vec<Option<String>>,
    ) -> Option<Record> {
        let raw: BTreeMap<String, String> = fields
            .iter()
            .cloned()
            .zip(values)
            .filter_map(|(field, value)| value.map(|v| (field, v)))
            .collect();
        if raw.values().all(String::is_empty) {
            return None;
        }
        let mut record = Record::with_id(self.ctx.clone(), Arc::clone(&self.schema), id);
        record.hydrate(&raw);
        Some(record)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("model", &self.schema.name())
            .field("mode", &self.ctx.mode())
            .finish()
    }
}
