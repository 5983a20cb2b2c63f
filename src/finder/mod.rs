// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Staleness detection.
//!
//! For each (entity type, destination) pair the finder compiles one SQL query
//! selecting the primary keys of entities whose last successful sync predates
//! their staleness threshold:
//!
//! ```text
//! threshold = greatest(own updated_at, dependency₁, dependency₂, ...)
//!
//! dependency (belongs-to)   newest row the owner points at
//! dependency (has-one/many) newest row pointing at the owner
//! dependency (through)      newest target reached via the through table
//! dependency (polymorphic)  greatest over each concrete type present in data
//! ```
//!
//! Nothing is loaded into memory except the distinct discriminator values of
//! polymorphic to-one associations. The returned [`StaleQuery`] is lazy and
//! restartable: it pages by primary key, so it can be resumed after any key.

mod expr;

use crate::error::{Result, SyncError};
use crate::registry::{Association, EntityType, Registry};
use expr::{Aliases, Expr};
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Entity type → destination → stale primary keys.
pub type StaleQueries = BTreeMap<String, BTreeMap<String, StaleQuery>>;

/// Lazy query producing stale primary keys for one (entity type, destination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleQuery {
    entity_type: String,
    destination: String,
    sql: String,
    binds: Vec<String>,
}

impl StaleQuery {
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The compiled statement (one `id` column).
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Values bound to the statement's placeholders, in order.
    pub fn binds(&self) -> &[String] {
        &self.binds
    }

    /// Up to `limit` stale keys greater than `after`, ascending.
    pub async fn fetch_page(&self, pool: &SqlitePool, after: Option<i64>, limit: usize) -> Result<Vec<i64>> {
        let sql = format!("SELECT id FROM ({}) WHERE id > ? ORDER BY id LIMIT ?", self.sql);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &self.binds {
            query = query.bind(value);
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(query.bind(after.unwrap_or(i64::MIN)).bind(limit).fetch_all(pool).await?)
    }

    /// Every stale key, ascending.
    pub async fn fetch_all(&self, pool: &SqlitePool) -> Result<Vec<i64>> {
        let sql = format!("SELECT id FROM ({}) ORDER BY id", self.sql);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &self.binds {
            query = query.bind(value);
        }
        Ok(query.fetch_all(pool).await?)
    }

    pub async fn count(&self, pool: &SqlitePool) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM ({})", self.sql);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &self.binds {
            query = query.bind(value);
        }
        Ok(query.fetch_one(pool).await?)
    }
}

/// Compiles staleness queries from registry declarations.
#[derive(Debug, Clone)]
pub struct StalenessFinder {
    registry: Arc<Registry>,
    pool: SqlitePool,
}

impl StalenessFinder {
    pub fn new(registry: Arc<Registry>, pool: SqlitePool) -> Self {
        Self { registry, pool }
    }

    /// Stale-key queries for every selected (entity type, destination) pair.
    ///
    /// `entity_types` defaults to every sync-capable type; naming an unknown
    /// type is a configuration error. `destination` restricts to one
    /// destination; types that do not declare it are left out.
    #[instrument(skip(self))]
    pub async fn find(&self, entity_types: Option<&[&str]>, destination: Option<&str>) -> Result<StaleQueries> {
        let selected: Vec<&EntityType> = match entity_types {
            Some(names) => names
                .iter()
                .map(|name| self.registry.require_entity(name))
                .collect::<Result<_>>()?,
            None => self.registry.sync_capable().collect(),
        };

        let mut result = StaleQueries::new();
        for entity in selected {
            let mut per_destination = BTreeMap::new();
            for name in entity.destinations() {
                if destination.is_some_and(|d| d != name) {
                    continue;
                }
                per_destination.insert(name.to_string(), self.query_for(entity, name).await?);
            }
            if !per_destination.is_empty() {
                result.insert(entity.name.clone(), per_destination);
            }
        }
        Ok(result)
    }

    /// Stale-key query for one pair.
    pub async fn query_for(&self, entity: &EntityType, destination: &str) -> Result<StaleQuery> {
        let binding = entity.binding(destination).ok_or_else(|| {
            SyncError::Config(format!(
                "{} does not declare a binding for destination {}",
                entity.name, destination
            ))
        })?;

        let mut aliases = Aliases::default();
        let mut parts = vec![expr::own_timestamp(entity)];
        for dependency in &binding.dependencies {
            parts.push(self.dependency_expr(&mut aliases, entity, dependency).await?);
        }
        let query = expr::stale_select(entity, destination, expr::greatest(parts));

        debug!(
            entity_type = %entity.name,
            destination = %destination,
            dependencies = binding.dependencies.len(),
            "Compiled staleness query"
        );
        Ok(StaleQuery {
            entity_type: entity.name.clone(),
            destination: destination.to_string(),
            sql: query.sql,
            binds: query.binds,
        })
    }

    async fn dependency_expr(&self, aliases: &mut Aliases, owner: &EntityType, name: &str) -> Result<Expr> {
        let Some(association) = owner.association_named(name) else {
            debug!(entity_type = %owner.name, dependency = %name, "Dependency is not a declared association, ignoring");
            return Ok(Expr::epoch());
        };

        Ok(match association {
            Association::BelongsTo { target, foreign_key } => expr::belongs_to(aliases, target, foreign_key),
            Association::HasOne {
                target,
                foreign_key,
                owner_type_column,
            }
            | Association::HasMany {
                target,
                foreign_key,
                owner_type_column,
            } => expr::has_many(aliases, owner, target, foreign_key, owner_type_column.as_deref()),
            Association::Through {
                through,
                owner_key,
                owner_type_column,
                source,
                target,
            } => expr::through(
                aliases,
                owner,
                through,
                owner_key,
                owner_type_column.as_deref(),
                source,
                target,
            ),
            Association::PolymorphicBelongsTo {
                foreign_key,
                type_column,
            } => {
                self.polymorphic_expr(aliases, owner, name, foreign_key, type_column)
                    .await?
            }
        })
    }

    async fn polymorphic_expr(
        &self,
        aliases: &mut Aliases,
        owner: &EntityType,
        name: &str,
        foreign_key: &str,
        type_column: &str,
    ) -> Result<Expr> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL AND {fk} IS NOT NULL ORDER BY {col}",
            col = crate::sql::quote(type_column),
            table = crate::sql::quote(&owner.table),
            fk = crate::sql::quote(foreign_key),
        );
        let discriminators: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;

        let mut branches = Vec::new();
        for discriminator in discriminators {
            match self.registry.resolve_type(&discriminator) {
                Some(target) => branches.push(expr::polymorphic_branch(
                    aliases,
                    &target.table_ref(),
                    foreign_key,
                    type_column,
                    &discriminator,
                )),
                None => debug!(
                    entity_type = %owner.name,
                    dependency = %name,
                    discriminator = %discriminator,
                    "Unresolvable polymorphic type, skipping"
                ),
            }
        }
        Ok(expr::greatest(branches))
    }
}
