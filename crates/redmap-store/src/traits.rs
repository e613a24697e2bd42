//! The [`KvStore`] and [`AsyncKvStore`] traits.
//!
//! Both expose the same primitive set: plain text keys, hash-typed keys,
//! integer counters, sets and sorted sets, plus pipelined execution. A client
//! for a networked store implements one or both; [`crate::InMemoryStore`]
//! implements both.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::pipeline::{Command, Pipeline, RangeLimit, Reply, ScoreBound};

/// Blocking key-value store.
///
/// Every call returns once the store has answered. Implementations must be
/// thread-safe; whether one client may be shared across threads is otherwise
/// up to the implementation.
pub trait KvStore: Send + Sync {
    /// Read a text value. `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a text value, replacing whatever the key held.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Write a text value only if the key does not exist.
    /// Returns `true` if the value was written.
    fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Atomically replace a text value, returning the previous one.
    fn get_and_set(&self, key: &str, value: &str) -> StoreResult<Option<String>>;

    /// Remove a key of any kind. Returns `true` if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment an integer key (missing keys start at 0) and
    /// return the new value.
    fn increment(&self, key: &str) -> StoreResult<i64>;

    fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Set several hash fields at once. An empty map is a no-op.
    fn hash_set_multi(&self, key: &str, fields: &BTreeMap<String, String>) -> StoreResult<()>;

    /// Read several hash fields; one positional entry per requested field.
    fn hash_get_multi(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>>;

    fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;

    /// Atomically add `delta` to an integer hash field and return the result.
    fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Add a member to a set. Returns `true` if it was not already present.
    fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Add or re-score a sorted-set member. Returns `true` if it was new.
    fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    /// Sorted-set members whose scores lie between `from` and `to`.
    ///
    /// With `reversed` unset, `from` is the minimum and members come back in
    /// ascending score order. With `reversed` set, `from` is the maximum and
    /// members come back in descending order.
    fn range_by_score(
        &self,
        key: &str,
        from: ScoreBound,
        to: ScoreBound,
        limit: Option<RangeLimit>,
        reversed: bool,
    ) -> StoreResult<Vec<String>>;

    /// Execute a pipeline, returning one reply per command in order.
    ///
    /// The default implementation issues the commands one by one and stops at
    /// the first failure. Backends should override it to execute the batch in
    /// one round trip and, where possible, atomically.
    fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        pipeline
            .commands()
            .iter()
            .map(|command| run_command(self, command))
            .collect()
    }
}

/// Non-blocking key-value store.
///
/// Same primitives as [`KvStore`]; each call yields to the runtime until the
/// store answers.
#[async_trait]
pub trait AsyncKvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;
    async fn get_and_set(&self, key: &str, value: &str) -> StoreResult<Option<String>>;
    async fn delete(&self, key: &str) -> StoreResult<bool>;
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    async fn increment(&self, key: &str) -> StoreResult<i64>;
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hash_set_multi(
        &self,
        key: &str,
        fields: &BTreeMap<String, String>,
    ) -> StoreResult<()>;
    async fn hash_get_multi(
        &self,
        key: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<String>>>;
    async fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;
    async fn range_by_score(
        &self,
        key: &str,
        from: ScoreBound,
        to: ScoreBound,
        limit: Option<RangeLimit>,
        reversed: bool,
    ) -> StoreResult<Vec<String>>;

    /// Execute a pipeline, returning one reply per command in order.
    async fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        let mut replies = Vec::with_capacity(pipeline.len());
        for command in pipeline.commands() {
            replies.push(run_command_async(self, command).await?);
        }
        Ok(replies)
    }
}

/// Issue one command against a blocking store.
pub fn run_command<S: KvStore + ?Sized>(store: &S, command: &Command) -> StoreResult<Reply> {
    Ok(match command {
        Command::Get { key } => store.get(key)?.map_or(Reply::Nil, Reply::Text),
        Command::Set { key, value } => {
            store.set(key, value)?;
            Reply::Ok
        }
        Command::SetIfAbsent { key, value } => Reply::Bool(store.set_if_absent(key, value)?),
        Command::GetAndSet { key, value } => {
            store.get_and_set(key, value)?.map_or(Reply::Nil, Reply::Text)
        }
        Command::Delete { key } => Reply::Bool(store.delete(key)?),
        Command::Exists { key } => Reply::Bool(store.exists(key)?),
        Command::Increment { key } => Reply::Int(store.increment(key)?),
        Command::HashGet { key, field } => {
            store.hash_get(key, field)?.map_or(Reply::Nil, Reply::Text)
        }
        Command::HashSetMulti { key, fields } => {
            store.hash_set_multi(key, fields)?;
            Reply::Ok
        }
        Command::HashGetMulti { key, fields } => Reply::Values(store.hash_get_multi(key, fields)?),
        Command::HashGetAll { key } => Reply::Map(store.hash_get_all(key)?),
        Command::HashIncrement { key, field, delta } => {
            Reply::Int(store.hash_increment(key, field, *delta)?)
        }
        Command::SetAdd { key, member } => Reply::Bool(store.set_add(key, member)?),
        Command::SetMembers { key } => Reply::Members(store.set_members(key)?),
        Command::SortedSetAdd { key, member, score } => {
            Reply::Bool(store.sorted_set_add(key, member, *score)?)
        }
        Command::RangeByScore {
            key,
            from,
            to,
            limit,
            reversed,
        } => Reply::Members(store.range_by_score(key, *from, *to, *limit, *reversed)?),
    })
}

/// Issue one command against a non-blocking store.
pub async fn run_command_async<S: AsyncKvStore + ?Sized>(
    store: &S,
    command: &Command,
) -> StoreResult<Reply> {
    Ok(match command {
        Command::Get { key } => store.get(key).await?.map_or(Reply::Nil, Reply::Text),
        Command::Set { key, value } => {
            store.set(key, value).await?;
            Reply::Ok
        }
        Command::SetIfAbsent { key, value } => {
            Reply::Bool(store.set_if_absent(key, value).await?)
        }
        Command::GetAndSet { key, value } => store
            .get_and_set(key, value)
            .await?
            .map_or(Reply::Nil, Reply::Text),
        Command::Delete { key } => Reply::Bool(store.delete(key).await?),
        Command::Exists { key } => Reply::Bool(store.exists(key).await?),
        Command::Increment { key } => Reply::Int(store.increment(key).await?),
        Command::HashGet { key, field } => store
            .hash_get(key, field)
            .await?
            .map_or(Reply::Nil, Reply::Text),
        Command::HashSetMulti { key, fields } => {
            store.hash_set_multi(key, fields).await?;
            Reply::Ok
        }
        Command::HashGetMulti { key, fields } => {
            Reply::Values(store.hash_get_multi(key, fields).await?)
        }
        Command::HashGetAll { key } => Reply::Map(store.hash_get_all(key).await?),
        Command::HashIncrement { key, field, delta } => {
            Reply::Int(store.hash_increment(key, field, *delta).await?)
        }
        Command::SetAdd { key, member } => Reply::Bool(store.set_add(key, member).await?),
        Command::SetMembers { key } => Reply::Members(store.set_members(key).await?),
        Command::SortedSetAdd { key, member, score } => {
            Reply::Bool(store.sorted_set_add(key, member, *score).await?)
        }
        Command::RangeByScore {
            key,
            from,
            to,
            limit,
            reversed,
        } => Reply::Members(
            store
                .range_by_score(key, *from, *to, *limit, *reversed)
                .await?,
        ),
    })
}
