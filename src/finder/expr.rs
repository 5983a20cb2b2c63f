// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Correlated timestamp expressions for staleness thresholds.
//!
//! Every builder yields an SQL fragment evaluated per owner row (aliased
//! [`OWNER`]) plus the values to bind for its `?` placeholders, in order of
//! appearance. Fragments never evaluate to NULL: empty subqueries collapse to
//! the epoch sentinel.

use crate::registry::{EntityType, Table, ThroughSource};
use crate::sql::{self, column, quote};

/// Alias of the owner table in the outer query.
pub(crate) const OWNER: &str = "o";

/// SQL fragment with its bound values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Expr {
    pub sql: String,
    pub binds: Vec<String>,
}

impl Expr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn epoch() -> Self {
        Self::new(sql::EPOCH)
    }

    fn bind(mut self, value: impl Into<String>) -> Self {
        self.binds.push(value.into());
        self
    }
}

/// Unique subquery aliases within one statement.
#[derive(Debug, Default)]
pub(crate) struct Aliases {
    next: usize,
}

impl Aliases {
    pub fn next(&mut self, prefix: &str) -> String {
        let alias = format!("{}{}", prefix, self.next);
        self.next += 1;
        alias
    }
}

/// Greatest of `exprs`, binds concatenated in argument order.
pub(crate) fn greatest(exprs: Vec<Expr>) -> Expr {
    let mut binds = Vec::new();
    let mut parts = Vec::with_capacity(exprs.len());
    for expr in exprs {
        parts.push(expr.sql);
        binds.extend(expr.binds);
    }
    Expr {
        sql: sql::greatest(parts),
        binds,
    }
}

/// The owner's own modification time.
pub(crate) fn own_timestamp(owner: &EntityType) -> Expr {
    Expr::new(sql::or_epoch(&column(OWNER, &owner.updated_at)))
}

/// `owner.foreign_key` → `target.primary_key`.
pub(crate) fn belongs_to(aliases: &mut Aliases, target: &Table, foreign_key: &str) -> Expr {
    let d = aliases.next("d");
    Expr::new(sql::or_epoch(&format!(
        "(SELECT {} FROM {} {} WHERE {} = {})",
        column(&d, &target.updated_at),
        quote(&target.name),
        d,
        column(&d, &target.primary_key),
        column(OWNER, foreign_key)
    )))
}

/// `target.foreign_key` → `owner.primary_key`, newest of any number of rows.
///
/// With `owner_type_column`, only rows whose discriminator names the owner type.
pub(crate) fn has_many(
    aliases: &mut Aliases,
    owner: &EntityType,
    target: &Table,
    foreign_key: &str,
    owner_type_column: Option<&str>,
) -> Expr {
    let d = aliases.next("d");
    let mut sql = format!(
        "(SELECT MAX({}) FROM {} {} WHERE {} = {}",
        column(&d, &target.updated_at),
        quote(&target.name),
        d,
        column(&d, foreign_key),
        column(OWNER, &owner.primary_key)
    );
    let mut binds = Vec::new();
    if let Some(type_column) = owner_type_column {
        sql.push_str(&format!(" AND {} = ?", column(&d, type_column)));
        binds.push(owner.name.clone());
    }
    sql.push(')');
    Expr {
        sql: sql::or_epoch(&sql),
        binds,
    }
}

/// Owner → through rows → target rows, newest target.
pub(crate) fn through(
    aliases: &mut Aliases,
    owner: &EntityType,
    through: &Table,
    owner_key: &str,
    owner_type_column: Option<&str>,
    source: &ThroughSource,
    target: &Table,
) -> Expr {
    let th = aliases.next("th");
    let tg = aliases.next("tg");
    let join = match source {
        ThroughSource::BelongsTo { foreign_key } => {
            format!("{} = {}", column(&tg, &target.primary_key), column(&th, foreign_key))
        }
        ThroughSource::HasMany { foreign_key } => {
            format!("{} = {}", column(&tg, foreign_key), column(&th, &through.primary_key))
        }
    };
    let mut sql = format!(
        "(SELECT MAX({}) FROM {} {} INNER JOIN {} {} ON {} WHERE {} = {}",
        column(&tg, &target.updated_at),
        quote(&through.name),
        th,
        quote(&target.name),
        tg,
        join,
        column(&th, owner_key),
        column(OWNER, &owner.primary_key)
    );
    let mut binds = Vec::new();
    if let Some(type_column) = owner_type_column {
        sql.push_str(&format!(" AND {} = ?", column(&th, type_column)));
        binds.push(owner.name.clone());
    }
    sql.push(')');
    Expr {
        sql: sql::or_epoch(&sql),
        binds,
    }
}

/// One concrete type of a polymorphic to-one, restricted to owner rows whose
/// discriminator equals `discriminator`.
pub(crate) fn polymorphic_branch(
    aliases: &mut Aliases,
    target: &Table,
    foreign_key: &str,
    type_column: &str,
    discriminator: &str,
) -> Expr {
    let d = aliases.next("d");
    Expr::new(sql::or_epoch(&format!(
        "(SELECT {} FROM {} {} WHERE {} = {} AND {} = ?)",
        column(&d, &target.updated_at),
        quote(&target.name),
        d,
        column(&d, &target.primary_key),
        column(OWNER, foreign_key),
        column(OWNER, type_column)
    )))
    .bind(discriminator)
}

/// Primary keys of owner rows stale for `destination` against `threshold`.
///
/// A pair is stale when it has no state row, has never synced, or last synced
/// strictly before the threshold.
pub(crate) fn stale_select(owner: &EntityType, destination: &str, threshold: Expr) -> Expr {
    let sql = format!(
        "SELECT {pk} AS id FROM {table} {o} \
         LEFT JOIN sync_states s ON s.resource_type = ? AND s.resource_id = {pk} AND s.destination_name = ? \
         WHERE s.id IS NULL OR s.last_synced_at IS NULL OR s.last_synced_at < {threshold}",
        pk = column(OWNER, &owner.primary_key),
        table = quote(&owner.table),
        o = OWNER,
        threshold = threshold.sql,
    );
    let mut binds = vec![owner.name.clone(), destination.to_string()];
    binds.extend(threshold.binds);
    Expr { sql, binds }
}
