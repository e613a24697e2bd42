//! Model schemas and the builder that assembles them.
//!
//! A [`ModelSchema`] is built once per model with [`ModelBuilder`] and then
//! shared, immutable, by every record of that model. The only later addition
//! is the set of reverse relations installed on it when other models
//! reference it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::attribute::Attribute;
use crate::error::Result;
use crate::key::Key;
use crate::record::Record;
use crate::reference::Reference;
use crate::validation::ValidationError;
use crate::value::Value;

/// Model-level validation hook, run after every field has been validated.
/// It sees the record with all field values materialized.
pub type RecordValidator = Arc<dyn Fn(&Record) -> Vec<ValidationError> + Send + Sync>;

/// A reverse relation: the records of `source` whose reference `field`
/// points at a record of the model this relation is installed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub source: String,
    pub field: String,
    pub stored_name: String,
}

/// A field looked up by name.
#[derive(Clone, Copy, Debug)]
pub enum Field<'a> {
    Attribute(&'a Attribute),
    Reference(&'a Reference),
}

impl Field<'_> {
    /// Name under which the value is cached and stored.
    pub fn stored_name(&self) -> &str {
        match self {
            Self::Attribute(a) => a.name(),
            Self::Reference(r) => r.stored_name(),
        }
    }

    pub fn default(&self) -> Option<Value> {
        match self {
            Self::Attribute(a) => a.default(),
            Self::Reference(r) => r.default(),
        }
    }

    pub fn read_cast(&self, raw: &str) -> Option<Value> {
        match self {
            Self::Attribute(a) => a.read_cast(raw),
            Self::Reference(r) => r.read_cast(raw),
        }
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, Self::Attribute(a) if a.is_counter())
    }
}

/// The schema of one model.
pub struct ModelSchema {
    name: String,
    key: Key,
    attributes: BTreeMap<String, Attribute>,
    references: BTreeMap<String, Reference>,
    counters: Vec<String>,
    validator: Option<RecordValidator>,
    relations: RwLock<BTreeMap<String, Relation>>,
}

impl ModelSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Declared attributes, counters included.
    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn references(&self) -> &BTreeMap<String, Reference> {
        &self.references
    }

    /// Counter field names, in declaration order.
    pub fn counters(&self) -> &[String] {
        &self.counters
    }

    pub fn is_counter(&self, name: &str) -> bool {
        self.counters.iter().any(|c| c == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn reference(&self, name: &str) -> Option<&Reference> {
        self.references.get(name)
    }

    /// Look up a field by attribute name, reference name, or a reference's
    /// stored identity field name.
    pub fn field(&self, name: &str) -> Option<Field<'_>> {
        if let Some(a) = self.attributes.get(name) {
            return Some(Field::Attribute(a));
        }
        if let Some(r) = self.references.get(name) {
            return Some(Field::Reference(r));
        }
        self.references
            .values()
            .find(|r| r.stored_name() == name)
            .map(Field::Reference)
    }

    /// Every hash field a record of this model may store: attributes,
    /// counters, and reference identity fields.
    pub fn stored_fields(&self) -> Vec<String> {
        self.attributes
            .keys()
            .cloned()
            .chain(self.references.values().map(|r| r.stored_name().to_string()))
            .collect()
    }

    pub fn validator(&self) -> Option<&RecordValidator> {
        self.validator.as_ref()
    }

    pub fn relation(&self, name: &str) -> Option<Relation> {
        self.relations
            .read()
            .expect("relations lock poisoned")
            .get(name)
            .cloned()
    }

    /// Names of the reverse relations installed so far.
    pub fn relation_names(&self) -> Vec<String> {
        self.relations
            .read()
            .expect("relations lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn install_relation(&self, relation: Relation) {
        self.relations
            .write()
            .expect("relations lock poisoned")
            .insert(relation.name.clone(), relation);
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("prefix", &self.key.prefix())
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("references", &self.references.keys().collect::<Vec<_>>())
            .field("counters", &self.counters)
            .finish()
    }
}

/// Declares a model.
///
/// Parents given with [`ModelBuilder::extends`] contribute their attributes,
/// references and counters first; the model's own declarations then
/// override same-named inherited ones.
///
/// ```ignore
/// let person = registry.register(
///     ModelBuilder::new("Person")
///         .attribute(Attribute::text("name").required())
///         .attribute(Attribute::counter("visits"))
///         .reference(Reference::new("employer", "Company")),
/// )?;
/// ```
pub struct ModelBuilder {
    name: String,
    key_prefix: Option<String>,
    parents: Vec<Arc<ModelSchema>>,
    attributes: Vec<Attribute>,
    references: Vec<Reference>,
    validator: Option<RecordValidator>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_prefix: None,
            parents: Vec::new(),
            attributes: Vec::new(),
            references: Vec::new(),
            validator: None,
        }
    }

    /// Inherit the fields of a registered model.
    pub fn extends(mut self, parent: &Arc<ModelSchema>) -> Self {
        self.parents.push(Arc::clone(parent));
        self
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    /// Store records under this prefix instead of the model name.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Model-level validation hook; its errors are appended after the
    /// per-field errors.
    pub fn validate_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> Vec<ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assemble the schema. Registration goes through
    /// [`crate::Registry::register`], which also wires reverse relations.
    pub(crate) fn build(self) -> Result<ModelSchema> {
        let key = Key::new(self.key_prefix.unwrap_or_else(|| self.name.clone()))?;

        let mut attributes = BTreeMap::new();
        let mut references = BTreeMap::new();
        let mut counters: Vec<String> = Vec::new();

        for parent in &self.parents {
            for (name, a) in &parent.attributes {
                attributes.insert(name.clone(), a.clone());
            }
            for (name, r) in &parent.references {
                references.insert(name.clone(), r.clone());
            }
            for c in &parent.counters {
                counters.retain(|existing| existing != c);
                counters.push(c.clone());
            }
        }

        for a in self.attributes {
            counters.retain(|existing| existing != a.name());
            if a.is_counter() {
                counters.push(a.name().to_string());
            }
            attributes.insert(a.name().to_string(), a);
        }
        for r in self.references {
            references.insert(r.name().to_string(), r);
        }

        let validator = self
            .validator
            .or_else(|| self.parents.iter().rev().find_map(|p| p.validator.clone()));

        Ok(ModelSchema {
            name: self.name,
            key,
            attributes,
            references,
            counters,
            validator,
            relations: RwLock::new(BTreeMap::new()),
        })
    }
}
