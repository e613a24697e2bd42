//! Key-value store primitives for the redmap record layer.
//!
//! redmap persists records as flat string-valued hashes. This crate defines
//! the store it talks to, as an interface: the primitive operations on text
//! keys, hash keys, counters, sets and sorted sets, and a pipelining facility
//! that batches them into one round trip.
//!
//! # Interfaces
//!
//! - [`KvStore`] -- blocking primitives, for the synchronous execution mode
//! - [`AsyncKvStore`] -- non-blocking primitives, for the asynchronous mode
//! - [`Pipeline`] -- ordered batch of [`Command`]s answered by ordered [`Reply`]s
//!
//! # Backends
//!
//! - [`InMemoryStore`] -- `HashMap`-based store implementing both traits, for
//!   tests and embedding
//!
//! # Design Rules
//!
//! 1. Values are text. Integers are stored as their decimal form.
//! 2. Increment primitives are atomic; callers rely on them for unique ids.
//! 3. A pipeline's replies line up one-to-one with its commands.
//! 4. All failures are returned as [`StoreError`]; nothing is retried here.

pub mod error;
pub mod memory;
pub mod pipeline;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use pipeline::{Command, Pipeline, RangeLimit, Reply, ScoreBound};
pub use traits::{AsyncKvStore, KvStore};
