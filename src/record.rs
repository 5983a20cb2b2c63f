// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Loaded entity rows.
//!
//! A [`Record`] is one row of an entity table with its columns mapped to JSON
//! by SQLite storage class. Serializers and guards read records; nothing in
//! the crate writes them.

use crate::error::Result;
use crate::registry::EntityType;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};

/// One entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Declared entity type name (the `resource_type` of its sync states).
    pub entity_type: String,
    /// Primary key.
    pub id: i64,
    /// Column values keyed by column name.
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>, id: i64, attributes: Map<String, Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            attributes,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.attributes.get(column).and_then(Value::as_str)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.attributes.get(column).and_then(Value::as_i64)
    }

    /// Read a millisecond timestamp column.
    pub fn get_timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get_i64(column).and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Load one row by primary key. `None` when the row does not exist.
    ///
    /// Accepts a pool or an open transaction, so a locked row can be re-read
    /// inside its lock.
    pub async fn load<'e, E>(executor: E, entity: &EntityType, id: i64) -> Result<Option<Self>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            crate::sql::quote(&entity.table),
            crate::sql::quote(&entity.primary_key)
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
        Ok(row.map(|row| Self::new(entity.name.clone(), id, row_to_map(&row))))
    }
}

/// Map each column to JSON by the storage class of its value.
pub(crate) fn row_to_map(row: &SqliteRow) -> Map<String, Value> {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, i));
    }
    map
}

fn column_value(row: &SqliteRow, index: usize) -> Value {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(_) => return Value::Null,
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "INT8" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(hex::encode(bytes)))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
