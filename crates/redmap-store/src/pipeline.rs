//! Pipelined command batches.
//!
//! A [`Pipeline`] is an ordered list of [`Command`]s sent to the store in one
//! round trip. The store answers with one [`Reply`] per command, in the same
//! order. Backends that support it execute the whole batch atomically.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Score bounds
// ---------------------------------------------------------------------------

/// One end of a sorted-set score range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScoreBound {
    /// Below every score.
    NegInfinity,
    /// Above every score.
    PosInfinity,
    /// An inclusive finite score.
    Score(f64),
}

impl ScoreBound {
    /// The bound as a float, with infinities mapped to `f64` infinities.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::NegInfinity => f64::NEG_INFINITY,
            Self::PosInfinity => f64::INFINITY,
            Self::Score(s) => *s,
        }
    }

    /// Lower bound from an optional score; `None` means negative infinity.
    pub fn lower(score: Option<f64>) -> Self {
        score.map_or(Self::NegInfinity, Self::Score)
    }

    /// Upper bound from an optional score; `None` means positive infinity.
    pub fn upper(score: Option<f64>) -> Self {
        score.map_or(Self::PosInfinity, Self::Score)
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegInfinity => write!(f, "-inf"),
            Self::PosInfinity => write!(f, "+inf"),
            Self::Score(s) => write!(f, "{s}"),
        }
    }
}

/// Offset/count window applied to a range result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeLimit {
    pub offset: usize,
    pub count: usize,
}

impl RangeLimit {
    /// The first `count` members.
    pub fn first(count: usize) -> Self {
        Self { offset: 0, count }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single store primitive, as queued in a pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    SetIfAbsent { key: String, value: String },
    GetAndSet { key: String, value: String },
    Delete { key: String },
    Exists { key: String },
    Increment { key: String },
    HashGet { key: String, field: String },
    HashSetMulti { key: String, fields: BTreeMap<String, String> },
    HashGetMulti { key: String, fields: Vec<String> },
    HashGetAll { key: String },
    HashIncrement { key: String, field: String, delta: i64 },
    SetAdd { key: String, member: String },
    SetMembers { key: String },
    SortedSetAdd { key: String, member: String, score: f64 },
    /// Members with scores between the bounds. When `reversed` is set the
    /// first bound is the maximum and results come back highest first.
    RangeByScore {
        key: String,
        from: ScoreBound,
        to: ScoreBound,
        limit: Option<RangeLimit>,
        reversed: bool,
    },
}

impl Command {
    /// The key this command addresses.
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::SetIfAbsent { key, .. }
            | Self::GetAndSet { key, .. }
            | Self::Delete { key }
            | Self::Exists { key }
            | Self::Increment { key }
            | Self::HashGet { key, .. }
            | Self::HashSetMulti { key, .. }
            | Self::HashGetMulti { key, .. }
            | Self::HashGetAll { key }
            | Self::HashIncrement { key, .. }
            | Self::SetAdd { key, .. }
            | Self::SetMembers { key }
            | Self::SortedSetAdd { key, .. }
            | Self::RangeByScore { key, .. } => key,
        }
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// The store's answer to one command.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Ok,
    Nil,
    Bool(bool),
    Int(i64),
    Text(String),
    /// Positional values, one per requested hash field.
    Values(Vec<Option<String>>),
    Map(BTreeMap<String, String>),
    Members(Vec<String>),
}

impl Reply {
    /// Interpret as an optional text value (`Nil` is `None`).
    pub fn into_text(self) -> StoreResult<Option<String>> {
        match self {
            Self::Text(s) => Ok(Some(s)),
            Self::Nil => Ok(None),
            _ => Err(StoreError::ReplyMismatch { expected: "text" }),
        }
    }

    pub fn into_bool(self) -> StoreResult<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            _ => Err(StoreError::ReplyMismatch { expected: "bool" }),
        }
    }

    pub fn into_int(self) -> StoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            _ => Err(StoreError::ReplyMismatch { expected: "integer" }),
        }
    }

    pub fn into_values(self) -> StoreResult<Vec<Option<String>>> {
        match self {
            Self::Values(v) => Ok(v),
            _ => Err(StoreError::ReplyMismatch { expected: "values" }),
        }
    }

    pub fn into_map(self) -> StoreResult<BTreeMap<String, String>> {
        match self {
            Self::Map(m) => Ok(m),
            _ => Err(StoreError::ReplyMismatch { expected: "map" }),
        }
    }

    pub fn into_members(self) -> StoreResult<Vec<String>> {
        match self {
            Self::Members(m) => Ok(m),
            _ => Err(StoreError::ReplyMismatch { expected: "members" }),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered batch of commands executed in one round trip.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arbitrary command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Delete { key: key.into() })
    }

    pub fn hash_set_multi(
        &mut self,
        key: impl Into<String>,
        fields: BTreeMap<String, String>,
    ) -> &mut Self {
        self.push(Command::HashSetMulti {
            key: key.into(),
            fields,
        })
    }

    pub fn hash_get_multi(&mut self, key: impl Into<String>, fields: Vec<String>) -> &mut Self {
        self.push(Command::HashGetMulti {
            key: key.into(),
            fields,
        })
    }

    pub fn set_members(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::SetMembers { key: key.into() })
    }

    /// The queued commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
