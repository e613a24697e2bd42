//! The model registry.
//!
//! Models are registered once at startup. Registration wires reverse
//! relations: a reference from `Pet` to `User` installs a relation on `User`
//! listing that user's pets. If `User` is not registered yet, the wiring is
//! parked under its name and replayed when `User` registers, so models may be
//! declared in any order. Relations only become queryable once both sides
//! are registered.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{ModelError, Result};
use crate::schema::{ModelBuilder, ModelSchema, Relation};

#[derive(Default)]
struct RegistryState {
    models: BTreeMap<String, Arc<ModelSchema>>,
    /// Relations waiting for their target model, keyed by target name.
    pending: HashMap<String, Vec<Relation>>,
}

/// All registered models of one application.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a model.
    ///
    /// Fails if the name or key prefix is already taken.
    pub fn register(&self, builder: ModelBuilder) -> Result<Arc<ModelSchema>> {
        let schema = Arc::new(builder.build()?);
        let mut state = self.state.write().expect("registry lock poisoned");

        if state.models.contains_key(schema.name()) {
            return Err(ModelError::DuplicateModel(schema.name().to_string()));
        }
        if state
            .models
            .values()
            .any(|m| m.key().prefix() == schema.key().prefix())
        {
            return Err(ModelError::DuplicateModel(schema.key().prefix().to_string()));
        }

        for reference in schema.references().values() {
            let relation = Relation {
                name: reference.relation_name(schema.name()),
                source: schema.name().to_string(),
                field: reference.name().to_string(),
                stored_name: reference.stored_name().to_string(),
            };
            if reference.target() == schema.name() {
                schema.install_relation(relation);
            } else if let Some(target) = state.models.get(reference.target()) {
                target.install_relation(relation);
            } else {
                debug!(
                    model = schema.name(),
                    target = reference.target(),
                    "reference target not registered yet; deferring relation"
                );
                state
                    .pending
                    .entry(reference.target().to_string())
                    .or_default()
                    .push(relation);
            }
        }

        if let Some(deferred) = state.pending.remove(schema.name()) {
            info!(
                model = schema.name(),
                relations = deferred.len(),
                "replaying deferred relations"
            );
            for relation in deferred {
                schema.install_relation(relation);
            }
        }

        state
            .models
            .insert(schema.name().to_string(), Arc::clone(&schema));
        info!(
            model = schema.name(),
            prefix = schema.key().prefix(),
            "model registered"
        );
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModelSchema>> {
        self.state
            .read()
            .expect("registry lock poisoned")
            .models
            .get(name)
            .cloned()
    }

    /// Like [`Registry::get`], failing with [`ModelError::UnknownModel`].
    pub fn require(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.get(name)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }

    /// The model whose records are stored under `prefix`.
    pub fn by_prefix(&self, prefix: &str) -> Option<Arc<ModelSchema>> {
        self.state
            .read()
            .expect("registry lock poisoned")
            .models
            .values()
            .find(|m| m.key().prefix() == prefix)
            .cloned()
    }

    /// Registered model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.state
            .read()
            .expect("registry lock poisoned")
            .models
            .keys()
            .cloned()
            .collect()
    }

    /// Names of referenced models that have not been registered yet.
    pub fn pending_targets(&self) -> Vec<String> {
        let state = self.state.read().expect("registry lock poisoned");
        let mut names: Vec<String> = state.pending.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.model_names())
            .field("pending", &self.pending_targets())
            .finish()
    }
}
