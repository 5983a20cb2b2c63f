// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination registry and entity declarations.
//!
//! The registry is built once at boot and then shared read-only as
//! `Arc<Registry>` with the finder, synchronizer, deleter and batch driver.
//!
//! ```text
//! Registry
//! ├── destinations: name → DestinationRegistration (adapter + options)
//! ├── entity_types: name → EntityType
//! │   ├── table / primary key / modification column
//! │   ├── associations: name → Association
//! │   └── bindings: destination → DestinationBinding
//! │        (serializer, object type, identity property, dependencies, guard)
//! └── aliases: discriminator → entity type name
//! ```
//!
//! # Registration order
//!
//! Entity types may be declared before or after the destinations they bind
//! to. Registering a destination installs it on every binding already
//! declared under its name; declaring an entity type installs every
//! destination already registered. A binding whose destination never gets
//! registered fails with [`SyncError::Config`] at lookup time.
//!
//! # Example
//!
//! ```rust
//! use outbound_sync::destination::NoOpDestination;
//! use outbound_sync::registry::{Association, DestinationBinding, DestinationOptions, EntityType, FnSerializer, Registry, Table};
//! use std::sync::Arc;
//!
//! let mut registry = Registry::new();
//! registry.declare_entity(
//!     EntityType::new("Company", "companies")
//!         .association("contacts", Association::has_many(Table::new("contacts"), "company_id"))
//!         .sync_to(
//!             "crm",
//!             DestinationBinding::new(
//!                 "companies",
//!                 FnSerializer::new(|r| Ok(r.attributes.clone())),
//!             )
//!             .depends_on(["contacts"]),
//!         ),
//! ).unwrap();
//! registry.register_destination("crm", Arc::new(NoOpDestination), DestinationOptions::default()).unwrap();
//!
//! assert!(registry.binding("Company", "crm").is_ok());
//! ```

use crate::destination::Destination;
use crate::error::{Result, SyncError};
use crate::record::Record;
use crate::sql::validate_identifier;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Predicate deciding whether a record should be synced to a destination.
pub type Guard = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// Serializers
// ═══════════════════════════════════════════════════════════════════════════════

/// Turns a record into a destination payload.
///
/// Must be a pure function of the record. The provided body is the abstract
/// base: it fails with [`SyncError::NotImplemented`] until overridden.
pub trait Serializer: Send + Sync {
    fn to_payload(&self, record: &Record) -> Result<Map<String, Value>> {
        Err(SyncError::NotImplemented(format!(
            "{} does not implement to_payload (record {}#{})",
            std::any::type_name::<Self>(),
            record.entity_type,
            record.id
        )))
    }
}

/// Serializer with no specialization; always fails with `NotImplemented`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseSerializer;

impl Serializer for BaseSerializer {}

/// Adapts a closure into a [`Serializer`].
pub struct FnSerializer<F>(F);

impl<F> FnSerializer<F>
where
    F: Fn(&Record) -> Result<Map<String, Value>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Serializer for FnSerializer<F>
where
    F: Fn(&Record) -> Result<Map<String, Value>> + Send + Sync,
{
    fn to_payload(&self, record: &Record) -> Result<Map<String, Value>> {
        (self.0)(record)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tables and associations
// ═══════════════════════════════════════════════════════════════════════════════

/// A table with a primary key and a millisecond modification column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub primary_key: String,
    pub updated_at: String,
}

impl Table {
    /// Table with `id` primary key and `updated_at` modification column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn with_updated_at(mut self, column: impl Into<String>) -> Self {
        self.updated_at = column.into();
        self
    }

    fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        validate_identifier(&self.primary_key)?;
        validate_identifier(&self.updated_at)
    }
}

/// Second hop of a [`Association::Through`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThroughSource {
    /// `through.foreign_key` points at `target.primary_key`.
    BelongsTo { foreign_key: String },
    /// `target.foreign_key` points at `through.primary_key`.
    HasMany { foreign_key: String },
}

/// How a dependency relates to its owner.
///
/// `owner_type_column`, when set, is the polymorphic "as" discriminator on the
/// far side; it is matched against the owner's entity type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// `owner.foreign_key` → `target.primary_key`.
    BelongsTo { target: Table, foreign_key: String },
    /// `target.foreign_key` → `owner.primary_key`, at most one row.
    HasOne {
        target: Table,
        foreign_key: String,
        owner_type_column: Option<String>,
    },
    /// `target.foreign_key` → `owner.primary_key`, any number of rows.
    HasMany {
        target: Table,
        foreign_key: String,
        owner_type_column: Option<String>,
    },
    /// Owner → through table (by `owner_key`) → target.
    Through {
        through: Table,
        owner_key: String,
        owner_type_column: Option<String>,
        source: ThroughSource,
        target: Table,
    },
    /// `owner.foreign_key` → primary key of whatever type `owner.type_column` names.
    PolymorphicBelongsTo { foreign_key: String, type_column: String },
}

impl Association {
    pub fn belongs_to(target: Table, foreign_key: impl Into<String>) -> Self {
        Self::BelongsTo {
            target,
            foreign_key: foreign_key.into(),
        }
    }

    pub fn has_one(target: Table, foreign_key: impl Into<String>) -> Self {
        Self::HasOne {
            target,
            foreign_key: foreign_key.into(),
            owner_type_column: None,
        }
    }

    pub fn has_many(target: Table, foreign_key: impl Into<String>) -> Self {
        Self::HasMany {
            target,
            foreign_key: foreign_key.into(),
            owner_type_column: None,
        }
    }

    pub fn through(through: Table, owner_key: impl Into<String>, source: ThroughSource, target: Table) -> Self {
        Self::Through {
            through,
            owner_key: owner_key.into(),
            owner_type_column: None,
            source,
            target,
        }
    }

    pub fn polymorphic(foreign_key: impl Into<String>, type_column: impl Into<String>) -> Self {
        Self::PolymorphicBelongsTo {
            foreign_key: foreign_key.into(),
            type_column: type_column.into(),
        }
    }

    /// Mark the far side as polymorphically owned (`as:` style).
    ///
    /// No effect on `BelongsTo` and `PolymorphicBelongsTo`.
    pub fn owned_as(mut self, type_column: impl Into<String>) -> Self {
        match &mut self {
            Self::HasOne { owner_type_column, .. }
            | Self::HasMany { owner_type_column, .. }
            | Self::Through { owner_type_column, .. } => *owner_type_column = Some(type_column.into()),
            Self::BelongsTo { .. } | Self::PolymorphicBelongsTo { .. } => {}
        }
        self
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::BelongsTo { target, foreign_key } => {
                target.validate()?;
                validate_identifier(foreign_key)
            }
            Self::HasOne {
                target,
                foreign_key,
                owner_type_column,
            }
            | Self::HasMany {
                target,
                foreign_key,
                owner_type_column,
            } => {
                target.validate()?;
                validate_identifier(foreign_key)?;
                owner_type_column.as_deref().map_or(Ok(()), validate_identifier)
            }
            Self::Through {
                through,
                owner_key,
                owner_type_column,
                source,
                target,
            } => {
                through.validate()?;
                target.validate()?;
                validate_identifier(owner_key)?;
                owner_type_column.as_deref().map_or(Ok(()), validate_identifier)?;
                match source {
                    ThroughSource::BelongsTo { foreign_key } | ThroughSource::HasMany { foreign_key } => {
                        validate_identifier(foreign_key)
                    }
                }
            }
            Self::PolymorphicBelongsTo { foreign_key, type_column } => {
                validate_identifier(foreign_key)?;
                validate_identifier(type_column)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Destinations
// ═══════════════════════════════════════════════════════════════════════════════

/// Options applied to every binding of a destination unless overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationOptions {
    /// Job queue name used when scheduling syncs.
    pub queue: String,
}

impl Default for DestinationOptions {
    fn default() -> Self {
        Self {
            queue: "outbound_sync".to_string(),
        }
    }
}

/// A registered destination.
pub struct DestinationRegistration {
    pub name: String,
    pub adapter: Arc<dyn Destination>,
    pub options: DestinationOptions,
}

impl fmt::Debug for DestinationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationRegistration")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// How one entity type syncs to one destination.
#[derive(Clone)]
pub struct DestinationBinding {
    /// Object type name on the destination (e.g. `"companies"`).
    pub object_type: String,
    pub serializer: Arc<dyn Serializer>,
    /// Payload property the destination can match existing objects on.
    pub identity_property: Option<String>,
    /// Association names whose changes make the owner stale.
    pub dependencies: Vec<String>,
    pub guard: Option<Guard>,
    /// Overrides the destination's default queue.
    pub queue: Option<String>,
    installed: Option<Arc<DestinationRegistration>>,
}

impl DestinationBinding {
    pub fn new(object_type: impl Into<String>, serializer: impl Serializer + 'static) -> Self {
        Self::with_serializer(object_type, Arc::new(serializer))
    }

    pub fn with_serializer(object_type: impl Into<String>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            object_type: object_type.into(),
            serializer,
            identity_property: None,
            dependencies: Vec::new(),
            guard: None,
            queue: None,
            installed: None,
        }
    }

    pub fn identity(mut self, property: impl Into<String>) -> Self {
        self.identity_property = Some(property.into());
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn guard(mut self, guard: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Whether the guard (if any) admits `record`.
    pub fn allows(&self, record: &Record) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(record))
    }

    pub fn is_installed(&self) -> bool {
        self.installed.is_some()
    }
}

impl fmt::Debug for DestinationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationBinding")
            .field("object_type", &self.object_type)
            .field("identity_property", &self.identity_property)
            .field("dependencies", &self.dependencies)
            .field("guard", &self.guard.is_some())
            .field("queue", &self.queue)
            .field("installed", &self.installed.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entity types
// ═══════════════════════════════════════════════════════════════════════════════

/// A syncable entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    /// Type name; stored as `resource_type` and matched by polymorphic discriminators.
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub updated_at: String,
    associations: BTreeMap<String, Association>,
    bindings: BTreeMap<String, DestinationBinding>,
}

impl EntityType {
    /// Entity on `table` with `id` primary key and `updated_at` modification column.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            updated_at: "updated_at".to_string(),
            associations: BTreeMap::new(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn with_updated_at(mut self, column: impl Into<String>) -> Self {
        self.updated_at = column.into();
        self
    }

    pub fn association(mut self, name: impl Into<String>, association: Association) -> Self {
        self.associations.insert(name.into(), association);
        self
    }

    /// Declare (or replace) the binding for `destination`.
    pub fn sync_to(mut self, destination: impl Into<String>, binding: DestinationBinding) -> Self {
        self.bindings.insert(destination.into(), binding);
        self
    }

    pub fn table_ref(&self) -> Table {
        Table {
            name: self.table.clone(),
            primary_key: self.primary_key.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    pub fn association_named(&self, name: &str) -> Option<&Association> {
        self.associations.get(name)
    }

    pub fn binding(&self, destination: &str) -> Option<&DestinationBinding> {
        self.bindings.get(destination)
    }

    /// Destination names this entity declares, in name order.
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn is_sync_capable(&self) -> bool {
        !self.bindings.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Config("entity type name is empty".to_string()));
        }
        self.table_ref().validate()?;
        for (name, association) in &self.associations {
            association
                .validate()
                .map_err(|e| SyncError::Config(format!("{}.{}: {}", self.name, name, e)))?;
        }
        for (destination, binding) in &self.bindings {
            if let Some(identity) = &binding.identity_property {
                if identity.is_empty() {
                    return Err(SyncError::Config(format!(
                        "{} → {}: identity property is empty",
                        self.name, destination
                    )));
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// A binding with its destination resolved.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedBinding<'a> {
    pub entity: &'a EntityType,
    pub destination: &'a str,
    pub binding: &'a DestinationBinding,
    pub registration: &'a DestinationRegistration,
}

impl<'a> ResolvedBinding<'a> {
    pub fn adapter(&self) -> &'a dyn Destination {
        self.registration.adapter.as_ref()
    }

    /// Binding override, else the destination default.
    pub fn queue(&self) -> &'a str {
        self.binding
            .queue
            .as_deref()
            .unwrap_or(self.registration.options.queue.as_str())
    }
}

/// Process-wide declarations, built at boot.
#[derive(Debug, Default)]
pub struct Registry {
    destinations: HashMap<String, Arc<DestinationRegistration>>,
    entity_types: BTreeMap<String, EntityType>,
    aliases: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a destination and install it on existing bindings.
    pub fn register_destination(
        &mut self,
        name: impl Into<String>,
        adapter: Arc<dyn Destination>,
        options: DestinationOptions,
    ) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SyncError::Config("destination name is empty".to_string()));
        }
        let registration = Arc::new(DestinationRegistration {
            name: name.clone(),
            adapter,
            options,
        });
        self.destinations.insert(name.clone(), registration.clone());

        let mut installed = 0usize;
        for entity in self.entity_types.values_mut() {
            if let Some(binding) = entity.bindings.get_mut(&name) {
                binding.installed = Some(registration.clone());
                installed += 1;
            }
        }
        info!(destination = %name, installed, "Registered destination");
        Ok(())
    }

    /// Declare (or replace) an entity type and install registered destinations on it.
    pub fn declare_entity(&mut self, mut entity: EntityType) -> Result<()> {
        entity.validate()?;
        for (destination, binding) in entity.bindings.iter_mut() {
            match self.destinations.get(destination) {
                Some(registration) => binding.installed = Some(registration.clone()),
                None => debug!(
                    entity_type = %entity.name,
                    destination = %destination,
                    "Destination not registered yet, binding pending"
                ),
            }
        }
        debug!(entity_type = %entity.name, destinations = entity.bindings.len(), "Declared entity type");
        self.entity_types.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Map an extra discriminator value onto a declared entity type.
    pub fn alias_type(&mut self, discriminator: impl Into<String>, entity_type: impl Into<String>) {
        self.aliases.insert(discriminator.into(), entity_type.into());
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    /// Entity type for `name`, or a configuration error.
    pub fn require_entity(&self, name: &str) -> Result<&EntityType> {
        self.entity(name)
            .ok_or_else(|| SyncError::Config(format!("Unknown entity type: {}", name)))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }

    /// Entity types declaring at least one destination.
    pub fn sync_capable(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values().filter(|e| e.is_sync_capable())
    }

    pub fn destination(&self, name: &str) -> Option<&DestinationRegistration> {
        self.destinations.get(name).map(Arc::as_ref)
    }

    /// Resolve a polymorphic discriminator. Blank or unknown values yield `None`.
    pub fn resolve_type(&self, discriminator: &str) -> Option<&EntityType> {
        let trimmed = discriminator.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.entity_types.get(trimmed).or_else(|| {
            self.aliases
                .get(trimmed)
                .and_then(|name| self.entity_types.get(name))
        })
    }

    /// Look up the binding of `entity_type` for `destination`.
    ///
    /// Fails fast with [`SyncError::Config`] when the entity type is unknown,
    /// declares no such destination, or the destination is not registered.
    pub fn binding(&self, entity_type: &str, destination: &str) -> Result<ResolvedBinding<'_>> {
        let entity = self.require_entity(entity_type)?;
        let binding = entity.binding(destination).ok_or_else(|| {
            SyncError::Config(format!(
                "{} does not declare a binding for destination {}",
                entity_type, destination
            ))
        })?;
        let registration = binding.installed.as_deref().ok_or_else(|| {
            SyncError::Config(format!("Destination {} is not registered", destination))
        })?;
        Ok(ResolvedBinding {
            entity,
            destination: registration.name.as_str(),
            binding,
            registration,
        })
    }
}
