//! Typed record mapping over a key-value hash store.
//!
//! Application code declares models with [`ModelBuilder`] and registers them
//! in a [`Registry`]. Each record of a model is persisted as one flat hash of
//! text fields under `<prefix>:<id>`; identities come from the atomic counter
//! at `<prefix>:id`.
//!
//! # Building blocks
//!
//! - [`Attribute`] -- a typed field: casting to and from stored text, and
//!   validation
//! - [`Reference`] -- a field holding another record's identity, plus the
//!   reverse relation installed on the target model
//! - [`ModelSchema`] -- the assembled fields of one model, with inheritance
//! - [`Context`] -- store handle, registry and configuration; its store
//!   handle selects synchronous or asynchronous execution
//! - [`Record`] -- one instance: lazy field cache, validation, save, delete
//! - [`Manager`] -- per-model lookups and pipelined batch reads
//!
//! # Design Rules
//!
//! 1. Validation failures are values ([`ValidationError`]), never errors.
//! 2. A record's identity never changes once allocated.
//! 3. Absent fields are omitted from the stored hash, never stored empty.
//! 4. Counters change only through atomic increments, never through `save`.
//! 5. Synchronous saves and counter increments are serialized per record by
//!    a store-side lock with a self-expiring lease. Asynchronous saves take
//!    no lock.
//! 6. Asynchronous batch reads report store failures as empty results and
//!    log them.

pub mod attribute;
pub mod config;
pub mod context;
pub mod error;
pub mod key;
pub mod lock;
pub mod manager;
pub mod record;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod validation;
pub mod value;

pub use attribute::{Attribute, FieldKind};
pub use config::{LockConfig, ModelConfig};
pub use context::{Context, ExecutionMode};
pub use error::{ModelError, Result};
pub use key::{parse_record_key, Key};
pub use lock::LockGuard;
pub use manager::Manager;
pub use record::{Record, RefValue, SaveOutcome};
pub use reference::Reference;
pub use registry::Registry;
pub use schema::{Field, ModelBuilder, ModelSchema, RecordValidator, Relation};
pub use validation::{FieldValidator, ValidationError, ValidationReason};
pub use value::{RecordId, Value};
