use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::pipeline::{Command, Pipeline, RangeLimit, Reply, ScoreBound};
use crate::traits::{AsyncKvStore, KvStore};

/// A value held at one key.
#[derive(Clone, Debug, PartialEq)]
enum Entry {
    Text(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    SortedSet(BTreeMap<String, f64>),
}

/// The keyspace, mutated only while the store's lock is held.
#[derive(Clone, Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn text(&self, key: &str) -> StoreResult<Option<&String>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Text(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash(&self, key: &str) -> StoreResult<Option<&BTreeMap<String, String>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &str) -> StoreResult<&mut BTreeMap<String, String>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()))
        {
            Entry::Hash(h) => Ok(h),
            _ => Err(wrong_type(key)),
        }
    }

    fn apply(&mut self, command: &Command) -> StoreResult<Reply> {
        let reply = match command {
            Command::Get { key } => self.text(key)?.cloned().map_or(Reply::Nil, Reply::Text),
            Command::Set { key, value } => {
                self.entries.insert(key.clone(), Entry::Text(value.clone()));
                Reply::Ok
            }
            Command::SetIfAbsent { key, value } => {
                if self.entries.contains_key(key) {
                    Reply::Bool(false)
                } else {
                    self.entries.insert(key.clone(), Entry::Text(value.clone()));
                    Reply::Bool(true)
                }
            }
            Command::GetAndSet { key, value } => {
                let previous = self.text(key)?.cloned();
                self.entries.insert(key.clone(), Entry::Text(value.clone()));
                previous.map_or(Reply::Nil, Reply::Text)
            }
            Command::Delete { key } => Reply::Bool(self.entries.remove(key).is_some()),
            Command::Exists { key } => Reply::Bool(self.entries.contains_key(key)),
            Command::Increment { key } => {
                let current = match self.text(key)? {
                    Some(s) => parse_int(s, key)?,
                    None => 0,
                };
                let next = current.checked_add(1).ok_or_else(|| overflow(key))?;
                self.entries.insert(key.clone(), Entry::Text(next.to_string()));
                Reply::Int(next)
            }
            Command::HashGet { key, field } => self
                .hash(key)?
                .and_then(|h| h.get(field).cloned())
                .map_or(Reply::Nil, Reply::Text),
            Command::HashSetMulti { key, fields } => {
                if !fields.is_empty() {
                    let hash = self.hash_mut(key)?;
                    hash.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Reply::Ok
            }
            Command::HashGetMulti { key, fields } => {
                let hash = self.hash(key)?;
                Reply::Values(
                    fields
                        .iter()
                        .map(|f| hash.and_then(|h| h.get(f).cloned()))
                        .collect(),
                )
            }
            Command::HashGetAll { key } => Reply::Map(self.hash(key)?.cloned().unwrap_or_default()),
            Command::HashIncrement { key, field, delta } => {
                let hash = self.hash_mut(key)?;
                let current = match hash.get(field) {
                    Some(s) => parse_int(s, &format!("{key}.{field}"))?,
                    None => 0,
                };
                let next = current
                    .checked_add(*delta)
                    .ok_or_else(|| overflow(&format!("{key}.{field}")))?;
                hash.insert(field.clone(), next.to_string());
                Reply::Int(next)
            }
            Command::SetAdd { key, member } => {
                match self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::Set(BTreeSet::new()))
                {
                    Entry::Set(set) => Reply::Bool(set.insert(member.clone())),
                    _ => return Err(wrong_type(key)),
                }
            }
            Command::SetMembers { key } => match self.entries.get(key) {
                None => Reply::Members(Vec::new()),
                Some(Entry::Set(set)) => Reply::Members(set.iter().cloned().collect()),
                Some(_) => return Err(wrong_type(key)),
            },
            Command::SortedSetAdd { key, member, score } => {
                match self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::SortedSet(BTreeMap::new()))
                {
                    Entry::SortedSet(zset) => {
                        Reply::Bool(zset.insert(member.clone(), *score).is_none())
                    }
                    _ => return Err(wrong_type(key)),
                }
            }
            Command::RangeByScore {
                key,
                from,
                to,
                limit,
                reversed,
            } => match self.entries.get(key) {
                None => Reply::Members(Vec::new()),
                Some(Entry::SortedSet(zset)) => {
                    Reply::Members(score_range(zset, *from, *to, *limit, *reversed))
                }
                Some(_) => return Err(wrong_type(key)),
            },
        };
        Ok(reply)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn overflow(key: &str) -> StoreError {
    StoreError::Overflow {
        key: key.to_string(),
    }
}

fn parse_int(s: &str, key: &str) -> StoreResult<i64> {
    s.parse().map_err(|_| StoreError::NotAnInteger {
        key: key.to_string(),
    })
}

fn score_range(
    zset: &BTreeMap<String, f64>,
    from: ScoreBound,
    to: ScoreBound,
    limit: Option<RangeLimit>,
    reversed: bool,
) -> Vec<String> {
    let (min, max) = if reversed {
        (to.as_f64(), from.as_f64())
    } else {
        (from.as_f64(), to.as_f64())
    };
    let mut hits: Vec<(&String, f64)> = zset
        .iter()
        .filter(|(_, score)| **score >= min && **score <= max)
        .map(|(member, score)| (member, *score))
        .collect();
    hits.sort_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));
    if reversed {
        hits.reverse();
    }
    let (offset, count) = limit.map_or((0, usize::MAX), |l| (l.offset, l.count));
    hits.into_iter()
        .skip(offset)
        .take(count)
        .map(|(member, _)| member.clone())
        .collect()
}

/// In-memory, HashMap-based key-value store.
///
/// Intended for tests and embedding. The keyspace lives behind a `RwLock`;
/// pipelines run under a single write lock and are all-or-nothing: if any
/// command fails, the keyspace is restored to its state before the pipeline.
pub struct InMemoryStore {
    keyspace: RwLock<Keyspace>,
    offline: AtomicBool,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            keyspace: RwLock::new(Keyspace::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    /// (or succeed again when `false`). Used to exercise failure paths.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.keyspace.read().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let keyspace = self.keyspace.read().expect("lock poisoned");
        let mut keys: Vec<String> = keyspace.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.keyspace
            .write()
            .expect("lock poisoned")
            .entries
            .clear();
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn run(&self, command: Command) -> StoreResult<Reply> {
        self.check_online()?;
        let mut keyspace = self.keyspace.write().expect("lock poisoned");
        keyspace.apply(&command)
    }

    fn run_pipeline(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        self.check_online()?;
        let mut keyspace = self.keyspace.write().expect("lock poisoned");
        let snapshot = keyspace.clone();
        let mut replies = Vec::with_capacity(pipeline.len());
        for command in pipeline.commands() {
            match keyspace.apply(command) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    *keyspace = snapshot;
                    return Err(e);
                }
            }
        }
        trace!(commands = pipeline.len(), "pipeline executed");
        Ok(replies)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("key_count", &self.len())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(Command::Get { key: key.into() })?.into_text()
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.run(Command::Set {
            key: key.into(),
            value: value.into(),
        })
        .map(|_| ())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.run(Command::SetIfAbsent {
            key: key.into(),
            value: value.into(),
        })?
        .into_bool()
    }

    fn get_and_set(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        self.run(Command::GetAndSet {
            key: key.into(),
            value: value.into(),
        })?
        .into_text()
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.run(Command::Delete { key: key.into() })?.into_bool()
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.run(Command::Exists { key: key.into() })?.into_bool()
    }

    fn increment(&self, key: &str) -> StoreResult<i64> {
        self.run(Command::Increment { key: key.into() })?.into_int()
    }

    fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.run(Command::HashGet {
            key: key.into(),
            field: field.into(),
        })?
        .into_text()
    }

    fn hash_set_multi(&self, key: &str, fields: &BTreeMap<String, String>) -> StoreResult<()> {
        self.run(Command::HashSetMulti {
            key: key.into(),
            fields: fields.clone(),
        })
        .map(|_| ())
    }

    fn hash_get_multi(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.run(Command::HashGetMulti {
            key: key.into(),
            fields: fields.to_vec(),
        })?
        .into_values()
    }

    fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        self.run(Command::HashGetAll { key: key.into() })?.into_map()
    }

    fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.run(Command::HashIncrement {
            key: key.into(),
            field: field.into(),
            delta,
        })?
        .into_int()
    }

    fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.run(Command::SetAdd {
            key: key.into(),
            member: member.into(),
        })?
        .into_bool()
    }

    fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.run(Command::SetMembers { key: key.into() })?.into_members()
    }

    fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.run(Command::SortedSetAdd {
            key: key.into(),
            member: member.into(),
            score,
        })?
        .into_bool()
    }

    fn range_by_score(
        &self,
        key: &str,
        from: ScoreBound,
        to: ScoreBound,
        limit: Option<RangeLimit>,
        reversed: bool,
    ) -> StoreResult<Vec<String>> {
        self.run(Command::RangeByScore {
            key: key.into(),
            from,
            to,
            limit,
            reversed,
        })?
        .into_members()
    }

    fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        self.run_pipeline(pipeline)
    }
}

#[async_trait]
impl AsyncKvStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        KvStore::get(self, key)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        KvStore::set(self, key, value)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        KvStore::set_if_absent(self, key, value)
    }

    async fn get_and_set(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        KvStore::get_and_set(self, key, value)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        KvStore::delete(self, key)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        KvStore::exists(self, key)
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        KvStore::increment(self, key)
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        KvStore::hash_get(self, key, field)
    }

    async fn hash_set_multi(
        &self,
        key: &str,
        fields: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        KvStore::hash_set_multi(self, key, fields)
    }

    async fn hash_get_multi(
        &self,
        key: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<String>>> {
        KvStore::hash_get_multi(self, key, fields)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        KvStore::hash_get_all(self, key)
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        KvStore::hash_increment(self, key, field, delta)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        KvStore::set_add(self, key, member)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        KvStore::set_members(self, key)
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        KvStore::sorted_set_add(self, key, member, score)
    }

    async fn range_by_score(
        &self,
        key: &str,
        from: ScoreBound,
        to: ScoreBound,
        limit: Option<RangeLimit>,
        reversed: bool,
    ) -> StoreResult<Vec<String>> {
        KvStore::range_by_score(self, key, from, to, limit, reversed)
    }

    async fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        self.run_pipeline(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Text keys and counters
    // -----------------------------------------------------------------------

    #[test]
    fn set_if_absent_only_writes_once() {
        let store = InMemoryStore::new();
        assert!(KvStore::set_if_absent(&store, "lock", "1.0").unwrap());
        assert!(!KvStore::set_if_absent(&store, "lock", "2.0").unwrap());
        assert_eq!(KvStore::get(&store, "lock").unwrap().as_deref(), Some("1.0"));
    }

    #[test]
    fn get_and_set_returns_previous() {
        let store = InMemoryStore::new();
        assert_eq!(KvStore::get_and_set(&store, "k", "a").unwrap(), None);
        assert_eq!(
            KvStore::get_and_set(&store, "k", "b").unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(KvStore::get(&store, "k").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn increment_starts_at_one() {
        let store = InMemoryStore::new();
        assert_eq!(KvStore::increment(&store, "Person:id").unwrap(), 1);
        assert_eq!(KvStore::increment(&store, "Person:id").unwrap(), 2);
        assert_eq!(KvStore::get(&store, "Person:id").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn increment_rejects_non_integer() {
        let store = InMemoryStore::new();
        KvStore::set(&store, "k", "abc").unwrap();
        assert!(matches!(
            KvStore::increment(&store, "k"),
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn delete_and_exists() {
        let store = InMemoryStore::new();
        KvStore::set(&store, "k", "v").unwrap();
        assert!(KvStore::exists(&store, "k").unwrap());
        assert!(KvStore::delete(&store, "k").unwrap());
        assert!(!KvStore::delete(&store, "k").unwrap());
        assert!(!KvStore::exists(&store, "k").unwrap());
    }

    // -----------------------------------------------------------------------
    // Hashes
    // -----------------------------------------------------------------------

    #[test]
    fn hash_multi_roundtrip_is_positional() {
        let store = InMemoryStore::new();
        KvStore::hash_set_multi(&store, "P:1", &fields(&[("name", "ann"), ("age", "3")]))
            .unwrap();
        let values = KvStore::hash_get_multi(
            &store,
            "P:1",
            &["age".to_string(), "missing".to_string(), "name".to_string()],
        )
        .unwrap();
        assert_eq!(
            values,
            vec![Some("3".to_string()), None, Some("ann".to_string())]
        );
    }

    #[test]
    fn empty_hash_write_creates_nothing() {
        let store = InMemoryStore::new();
        KvStore::hash_set_multi(&store, "P:1", &BTreeMap::new()).unwrap();
        assert!(!KvStore::exists(&store, "P:1").unwrap());
    }

    #[test]
    fn hash_increment_accumulates() {
        let store = InMemoryStore::new();
        assert_eq!(KvStore::hash_increment(&store, "C:1", "hits", 5).unwrap(), 5);
        assert_eq!(KvStore::hash_increment(&store, "C:1", "hits", -2).unwrap(), 3);
        assert_eq!(
            KvStore::hash_get(&store, "C:1", "hits").unwrap().as_deref(),
            Some("3")
        );
    }

    #[test]
    fn increment_overflow_is_an_error_and_store_stays_usable() {
        let store = InMemoryStore::new();
        KvStore::hash_increment(&store, "C:1", "hits", i64::MAX).unwrap();
        assert!(matches!(
            KvStore::hash_increment(&store, "C:1", "hits", 1),
            Err(StoreError::Overflow { .. })
        ));
        assert_eq!(
            KvStore::hash_get(&store, "C:1", "hits").unwrap(),
            Some(i64::MAX.to_string())
        );

        KvStore::set(&store, "C:id", &i64::MAX.to_string()).unwrap();
        assert!(matches!(
            KvStore::increment(&store, "C:id"),
            Err(StoreError::Overflow { .. })
        ));
        assert_eq!(
            KvStore::get(&store, "C:id").unwrap(),
            Some(i64::MAX.to_string())
        );
    }

    #[test]
    fn hash_op_on_text_key_is_wrong_type() {
        let store = InMemoryStore::new();
        KvStore::set(&store, "k", "v").unwrap();
        assert!(matches!(
            KvStore::hash_get_all(&store, "k"),
            Err(StoreError::WrongType { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Sets and sorted sets
    // -----------------------------------------------------------------------

    #[test]
    fn set_members_sorted() {
        let store = InMemoryStore::new();
        KvStore::set_add(&store, "s", "b").unwrap();
        KvStore::set_add(&store, "s", "a").unwrap();
        assert!(!KvStore::set_add(&store, "s", "a").unwrap());
        assert_eq!(KvStore::set_members(&store, "s").unwrap(), vec!["a", "b"]);
        assert!(KvStore::set_members(&store, "nope").unwrap().is_empty());
    }

    #[test]
    fn range_by_score_forward_and_reverse() {
        let store = InMemoryStore::new();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            KvStore::sorted_set_add(&store, "z", m, s).unwrap();
        }
        let forward = KvStore::range_by_score(
            &store,
            "z",
            ScoreBound::Score(2.0),
            ScoreBound::PosInfinity,
            None,
            false,
        )
        .unwrap();
        assert_eq!(forward, vec!["b", "c", "d"]);

        let reverse = KvStore::range_by_score(
            &store,
            "z",
            ScoreBound::PosInfinity,
            ScoreBound::NegInfinity,
            Some(RangeLimit::first(2)),
            true,
        )
        .unwrap();
        assert_eq!(reverse, vec!["d", "c"]);
    }

    // -----------------------------------------------------------------------
    // Pipelines and failure injection
    // -----------------------------------------------------------------------

    #[test]
    fn pipeline_replies_in_order() {
        let store = InMemoryStore::new();
        KvStore::hash_set_multi(&store, "P:1", &fields(&[("old", "x")])).unwrap();

        let mut p = Pipeline::new();
        p.delete("P:1")
            .hash_set_multi("P:1", fields(&[("new", "y")]))
            .hash_get_multi("P:1", vec!["old".into(), "new".into()]);
        let replies = KvStore::execute(&store, &p).unwrap();

        assert_eq!(replies[0], Reply::Bool(true));
        assert_eq!(replies[1], Reply::Ok);
        assert_eq!(
            replies[2],
            Reply::Values(vec![None, Some("y".to_string())])
        );
    }

    #[test]
    fn failed_pipeline_rolls_back() {
        let store = InMemoryStore::new();
        KvStore::set(&store, "text", "v").unwrap();
        KvStore::hash_set_multi(&store, "P:1", &fields(&[("a", "1")])).unwrap();

        let mut p = Pipeline::new();
        p.delete("P:1").hash_get_multi("text", vec!["a".into()]);
        assert!(KvStore::execute(&store, &p).is_err());
        assert!(KvStore::exists(&store, "P:1").unwrap());
    }

    #[test]
    fn offline_store_fails_everything() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            KvStore::get(&store, "k"),
            Err(StoreError::Unavailable(_))
        ));
        assert!(KvStore::execute(&store, &Pipeline::new()).is_err());
        store.set_offline(false);
        assert_eq!(KvStore::get(&store, "k").unwrap(), None);
    }

    #[tokio::test]
    async fn async_interface_shares_keyspace() {
        let store = InMemoryStore::new();
        AsyncKvStore::hash_set_multi(&store, "P:1", &fields(&[("name", "ann")]))
            .await
            .unwrap();
        assert_eq!(
            KvStore::hash_get(&store, "P:1", "name").unwrap().as_deref(),
            Some("ann")
        );
        assert_eq!(AsyncKvStore::increment(&store, "P:id").await.unwrap(), 1);

        let mut p = Pipeline::new();
        p.set_members("missing");
        let replies = AsyncKvStore::execute(&store, &p).await.unwrap();
        assert_eq!(replies, vec![Reply::Members(Vec::new())]);
    }

    #[test]
    fn keys_listing_and_clear() {
        let store = InMemoryStore::new();
        KvStore::set(&store, "b", "1").unwrap();
        KvStore::set(&store, "a", "1").unwrap();
        assert_eq!(store.keys(), vec!["a", "b"]);
        store.clear();
        assert!(store.is_empty());
    }
}
