//! Execution context.
//!
//! A [`Context`] bundles everything a record operation needs: the store
//! handle, the model registry and the configuration. The kind of store
//! handle decides the execution mode. With a blocking [`KvStore`] every
//! operation waits for the store, field reads are lazy and saves are
//! locked. With an [`AsyncKvStore`], operations are `async fn`s, field reads
//! never touch the store and saves are not locked.

use std::future::Future;
use std::sync::Arc;

use redmap_store::{AsyncKvStore, KvStore};
use tokio::task::JoinHandle;

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::manager::Manager;
use crate::record::Record;
use crate::registry::Registry;

/// How record operations talk to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

#[derive(Clone)]
enum StoreHandle {
    Sync(Arc<dyn KvStore>),
    Async(Arc<dyn AsyncKvStore>),
}

/// Shared handle to a store, a registry and a configuration. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    store: StoreHandle,
    registry: Arc<Registry>,
    config: Arc<ModelConfig>,
}

impl Context {
    /// A synchronous context over a blocking store.
    pub fn sync(store: Arc<dyn KvStore>, registry: Arc<Registry>) -> Self {
        Self {
            store: StoreHandle::Sync(store),
            registry,
            config: Arc::new(ModelConfig::default()),
        }
    }

    /// An asynchronous context over a non-blocking store.
    pub fn asynchronous(store: Arc<dyn AsyncKvStore>, registry: Arc<Registry>) -> Self {
        Self {
            store: StoreHandle::Async(store),
            registry,
            config: Arc::new(ModelConfig::default()),
        }
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        match self.store {
            StoreHandle::Sync(_) => ExecutionMode::Sync,
            StoreHandle::Async(_) => ExecutionMode::Async,
        }
    }

    pub fn is_async(&self) -> bool {
        self.mode() == ExecutionMode::Async
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The blocking store, or [`ModelError::ModeMismatch`] on an
    /// asynchronous context.
    pub fn sync_store(&self) -> Result<&Arc<dyn KvStore>> {
        match &self.store {
            StoreHandle::Sync(store) => Ok(store),
            StoreHandle::Async(_) => Err(ModelError::ModeMismatch {
                expected: "synchronous",
            }),
        }
    }

    /// The non-blocking store, or [`ModelError::ModeMismatch`] on a
    /// synchronous context.
    pub fn async_store(&self) -> Result<&Arc<dyn AsyncKvStore>> {
        match &self.store {
            StoreHandle::Async(store) => Ok(store),
            StoreHandle::Sync(_) => Err(ModelError::ModeMismatch {
                expected: "asynchronous",
            }),
        }
    }

    /// The batch manager of a registered model.
    pub fn manager(&self, model: &str) -> Result<Manager> {
        Manager::new(self, model)
    }

    /// A new, unsaved record of a registered model.
    pub fn new_record(&self, model: &str) -> Result<Record> {
        let schema = self.registry.require(model)?;
        Ok(Record::new(self.clone(), schema))
    }

    /// Run an asynchronous operation on the tokio runtime and hand its
    /// output to `callback` once it completes.
    ///
    /// Must be called from within a runtime.
    ///
    /// ```ignore
    /// let manager = ctx.manager("User")?;
    /// Context::dispatch(
    ///     async move { manager.get_by_ids_async(&ids).await },
    ///     |users| println!("{} users", users.len()),
    /// );
    /// ```
    pub fn dispatch<F, C>(future: F, callback: C) -> JoinHandle<()>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        C: FnOnce(F::Output) + Send + 'static,
    {
        tokio::spawn(async move { callback(future.await) })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("mode", &self.mode())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
