use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StorageContext};
use crate::sqlite::SCHEMA_META_TABLE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub ordinal: i64,
    pub name: String,
    pub declared_type: Option<String>,
    pub nullable: bool,
    pub default_value_sql: Option<String>,
    pub primary_key_position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectDescriptor {
    pub name: String,
    pub kind: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Snapshot of the queryable schema, read from the live database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    objects: Vec<ObjectDescriptor>,
}

impl Catalog {
    #[must_use]
    pub fn from_objects(objects: Vec<ObjectDescriptor>) -> Self {
        Self { objects }
    }

    #[must_use]
    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.objects
    }

    /// Lower-cased names of every queryable table or view.
    #[must_use]
    pub fn allowed_tables(&self) -> BTreeSet<String> {
        self.objects
            .iter()
            .map(|object| object.name.to_ascii_lowercase())
            .collect()
    }

    #[must_use]
    pub fn columns_by_table(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.objects
            .iter()
            .map(|object| {
                let columns = object
                    .columns
                    .iter()
                    .map(|column| column.name.to_ascii_lowercase())
                    .collect();
                (object.name.to_ascii_lowercase(), columns)
            })
            .collect()
    }

    #[must_use]
    pub fn allows_table(&self, name: &str) -> bool {
        self.objects
            .iter()
            .any(|object| object.name.eq_ignore_ascii_case(name))
    }

    /// One `TABLE name (column TYPE, ...)` line per object; the text handed to
    /// the query translator.
    #[must_use]
    pub fn schema_text(&self) -> String {
        self.objects
            .iter()
            .map(|object| {
                let columns = object
                    .columns
                    .iter()
                    .map(|column| match column.declared_type.as_deref() {
                        Some(declared_type) if !declared_type.is_empty() => {
                            format!("{} {declared_type}", column.name)
                        }
                        _ => column.name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {} ({columns})", object.kind.to_ascii_uppercase(), object.name)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Introspects the persisted schema. Internal sqlite objects and the schema
/// meta table are never part of the catalog.
pub fn describe(connection: &Connection) -> Result<Catalog> {
    let objects = describe_objects(connection)?;
    debug!(objects = objects.len(), "described schema catalog");
    Ok(Catalog::from_objects(objects))
}

pub fn describe_objects(connection: &Connection) -> Result<Vec<ObjectDescriptor>> {
    let mut statement = connection
        .prepare(
            "SELECT name, type
             FROM sqlite_schema
             WHERE type IN ('table', 'view')
             ORDER BY CASE type WHEN 'table' THEN 0 ELSE 1 END, name ASC",
        )
        .storage_context("failed to prepare sqlite_schema introspection query")?;

    let object_rows = statement
        .query_map([], |row| {
            Ok((row.get::<usize, String>(0)?, row.get::<usize, String>(1)?))
        })
        .storage_context("failed to execute sqlite_schema introspection query")?;

    let mut objects = Vec::new();
    for row in object_rows {
        let (name, kind) = row.storage_context("failed to decode sqlite_schema row")?;
        if is_internal_schema_object(&name) {
            continue;
        }
        let columns = describe_columns(connection, &name)?;
        objects.push(ObjectDescriptor {
            name,
            kind,
            columns,
        });
    }

    Ok(objects)
}

fn describe_columns(connection: &Connection, object_name: &str) -> Result<Vec<ColumnDescriptor>> {
    let pragma_sql = format!("PRAGMA table_info({})", sqlite_single_quoted(object_name));
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_storage_context(|| format!("failed to prepare column introspection for `{object_name}`"))?;

    let column_rows = statement
        .query_map([], |row| {
            Ok(ColumnDescriptor {
                ordinal: row.get::<usize, i64>(0)?,
                name: row.get::<usize, String>(1)?,
                declared_type: row.get::<usize, Option<String>>(2)?,
                nullable: row.get::<usize, i64>(3)? == 0,
                default_value_sql: row.get::<usize, Option<String>>(4)?,
                primary_key_position: row.get::<usize, i64>(5)?,
            })
        })
        .with_storage_context(|| format!("failed to execute column introspection for `{object_name}`"))?;

    column_rows
        .map(|row| row.storage_context("failed to decode schema column row"))
        .collect()
}

fn is_internal_schema_object(object_name: &str) -> bool {
    object_name.starts_with("sqlite_") || object_name == SCHEMA_META_TABLE
}

fn sqlite_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
