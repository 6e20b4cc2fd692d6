//! Catalog-validated generic record access.
//!
//! # Responsibility
//! - Provide table-agnostic CRUD primitives for the log-entry workflow and for
//!   migration backfills.
//! - Keep identifiers and values apart: names are validated against the
//!   `SchemaCatalog` and quoted, values are always bound parameters.
//!
//! # Invariants
//! - Unknown tables/columns fail with `DbError::SchemaMismatch` before any SQL
//!   runs, including names the catalog only introduces in a later version.
//! - Unique/primary-key violations surface as `DbError::Duplicate`.
//! - Update/delete of a missing key is `DbError::RowNotFound`, never a silent
//!   no-op.

use crate::db::catalog::{ColumnDef, SchemaCatalog, TableDef};
use crate::db::probe::read_schema_version;
use crate::db::{DbError, DbResult};
use rusqlite::types::Value;
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode, ToSql};
use std::collections::BTreeMap;

/// One selected row, keyed by column name.
pub type Record = BTreeMap<String, Value>;

/// Column/value pairs for insert and update.
pub type Fields<'a> = [(&'a str, Value)];

pub struct RecordGateway<'conn> {
    conn: &'conn Connection,
    catalog: SchemaCatalog,
    version: u32,
}

impl<'conn> RecordGateway<'conn> {
    /// Gateway over the tables and columns that exist at schema `version`.
    pub fn new(conn: &'conn Connection, version: u32) -> Self {
        Self {
            conn,
            catalog: SchemaCatalog::for_version(version),
            version,
        }
    }

    /// Builds a gateway for the version recorded in the connection's marker.
    pub fn for_connection(conn: &'conn Connection) -> DbResult<Self> {
        let version = read_schema_version(conn)?;
        Ok(Self::new(conn, version))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn exists(&self, table: &str, column: &str, value: impl ToSql) -> DbResult<bool> {
        let table_def = self.table_def(table)?;
        let column = self.column_def(table_def, column)?.name;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE \"{column}\" = ?1);",
            table_def.name
        );
        let exists: i64 = self
            .conn
            .prepare_cached(&sql)?
            .query_row([&value as &dyn ToSql], |row| row.get(0))?;
        Ok(exists == 1)
    }

    /// Whether a row matches every `(column, value)` pair.
    pub fn exists_matching(&self, table: &str, filters: &Fields<'_>) -> DbResult<bool> {
        let table_def = self.table_def(table)?;
        let (clause, values) = self.where_clause(table_def, filters)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE {clause});",
            table_def.name
        );
        let exists: i64 = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(values), |row| row.get(0))?;
        Ok(exists == 1)
    }

    /// Largest integer primary key in `table`, `0` when empty.
    pub fn max_id(&self, table: &str) -> DbResult<i64> {
        let table_def = self.integer_keyed(table)?;
        let sql = format!(
            "SELECT COALESCE(MAX(\"{}\"), 0) FROM \"{}\";",
            table_def.primary_key, table_def.name
        );
        let max: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(max)
    }

    /// Predicts the key the next insert into `table` will receive.
    ///
    /// Assumes a single writer: nothing is reserved in the database, so a
    /// concurrent insert can claim the same key. `AUTOINCREMENT` never reuses
    /// keys of deleted tail rows, so the prediction can also undershoot after
    /// deletes. Callers that write the row should prefer the rowid returned by
    /// `insert`.
    pub fn reserve_next_id(&self, table: &str) -> DbResult<i64> {
        Ok(self.max_id(table)? + 1)
    }

    /// Inserts one row and returns its rowid.
    pub fn insert(&self, table: &str, fields: &Fields<'_>) -> DbResult<i64> {
        let table_def = self.table_def(table)?;
        let sql = self.insert_sql(table_def, fields, "INSERT")?;
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(fields.iter().map(|(_, value)| value)))
            .map_err(|err| write_error(table_def, err))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Inserts one row unless it collides with an existing key.
    ///
    /// Returns `true` when a row was written.
    pub fn insert_if_absent(&self, table: &str, fields: &Fields<'_>) -> DbResult<bool> {
        let table_def = self.table_def(table)?;
        let sql = self.insert_sql(table_def, fields, "INSERT OR IGNORE")?;
        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(fields.iter().map(|(_, value)| value)))
            .map_err(|err| write_error(table_def, err))?;
        Ok(changed == 1)
    }

    /// Selects rows, optionally filtered by one column, ordered by key.
    pub fn select(&self, table: &str, filter: Option<(&str, Value)>) -> DbResult<Vec<Record>> {
        let table_def = self.table_def(table)?;
        let mut sql = format!("SELECT * FROM \"{}\"", table_def.name);
        let mut values = Vec::new();
        if let Some((column, value)) = filter {
            let column = self.column_def(table_def, column)?.name;
            sql.push_str(&format!(" WHERE \"{column}\" = ?1"));
            values.push(value);
        }
        sql.push_str(&format!(" ORDER BY \"{}\" ASC;", table_def.primary_key));

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name.clone(), row.get::<_, Value>(index)?);
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Selects one row by primary key.
    pub fn find(&self, table: &str, key: impl Into<Value>) -> DbResult<Option<Record>> {
        let table_def = self.table_def(table)?;
        let mut records = self.select(table, Some((table_def.primary_key, key.into())))?;
        Ok(records.pop())
    }

    pub fn update(&self, table: &str, fields: &Fields<'_>, key: impl Into<Value>) -> DbResult<()> {
        let table_def = self.table_def(table)?;
        if fields.is_empty() {
            return Err(DbError::InvalidData(format!(
                "update of `{}` without fields",
                table_def.name
            )));
        }

        let mut assignments = Vec::with_capacity(fields.len());
        for (index, (column, _)) in fields.iter().enumerate() {
            let column = self.column_def(table_def, column)?.name;
            assignments.push(format!("\"{column}\" = ?{}", index + 1));
        }
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?{};",
            table_def.name,
            assignments.join(", "),
            table_def.primary_key,
            fields.len() + 1
        );

        let key = key.into();
        let key_text = value_to_key_text(&key);
        let values = fields
            .iter()
            .map(|(_, value)| value.clone())
            .chain(std::iter::once(key));
        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(values))
            .map_err(|err| write_error(table_def, err))?;
        if changed == 0 {
            return Err(DbError::RowNotFound {
                table: table_def.name.to_string(),
                key: key_text,
            });
        }
        Ok(())
    }

    pub fn delete(&self, table: &str, key: impl Into<Value>) -> DbResult<()> {
        let table_def = self.table_def(table)?;
        let key = key.into();
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1;",
            table_def.name, table_def.primary_key
        );
        let changed = self.conn.prepare_cached(&sql)?.execute([&key])?;
        if changed == 0 {
            return Err(DbError::RowNotFound {
                table: table_def.name.to_string(),
                key: value_to_key_text(&key),
            });
        }
        Ok(())
    }

    /// Deletes every row where `column = value`; returns the number removed.
    pub fn delete_where(&self, table: &str, column: &str, value: impl ToSql) -> DbResult<usize> {
        let table_def = self.table_def(table)?;
        let column = self.column_def(table_def, column)?.name;
        let sql = format!("DELETE FROM \"{}\" WHERE \"{column}\" = ?1;", table_def.name);
        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute([&value as &dyn ToSql])?;
        Ok(changed)
    }

    fn table_def(&self, table: &str) -> DbResult<&'static TableDef> {
        let table_def = self.catalog.table(table)?;
        if !table_def.exists_at(self.version) {
            return Err(DbError::schema_mismatch(
                self.catalog.generation(),
                table_def.name,
                None,
            ));
        }
        Ok(table_def)
    }

    fn column_def(&self, table_def: &TableDef, column: &str) -> DbResult<&'static ColumnDef> {
        table_def
            .column(column)
            .filter(|column_def| column_def.added_in <= self.version)
            .ok_or_else(|| {
                DbError::schema_mismatch(self.catalog.generation(), table_def.name, Some(column))
            })
    }

    fn integer_keyed(&self, table: &str) -> DbResult<&'static TableDef> {
        let table_def = self.table_def(table)?;
        if !table_def.integer_key {
            return Err(DbError::InvalidData(format!(
                "table `{}` is keyed by `{}`, not an integer id",
                table_def.name, table_def.primary_key
            )));
        }
        Ok(table_def)
    }

    fn insert_sql(&self, table_def: &TableDef, fields: &Fields<'_>, verb: &str) -> DbResult<String> {
        if fields.is_empty() {
            return Ok(format!("{verb} INTO \"{}\" DEFAULT VALUES;", table_def.name));
        }
        let mut columns = Vec::with_capacity(fields.len());
        for (column, _) in fields {
            columns.push(format!(
                "\"{}\"",
                self.column_def(table_def, column)?.name
            ));
        }
        let placeholders = (1..=fields.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>();
        Ok(format!(
            "{verb} INTO \"{}\" ({}) VALUES ({});",
            table_def.name,
            columns.join(", "),
            placeholders.join(", ")
        ))
    }

    fn where_clause(
        &self,
        table_def: &TableDef,
        filters: &Fields<'_>,
    ) -> DbResult<(String, Vec<Value>)> {
        if filters.is_empty() {
            return Ok(("1 = 1".to_string(), Vec::new()));
        }
        let mut terms = Vec::with_capacity(filters.len());
        let mut values = Vec::with_capacity(filters.len());
        for (index, (column, value)) in filters.iter().enumerate() {
            let column = self.column_def(table_def, column)?.name;
            terms.push(format!("\"{column}\" = ?{}", index + 1));
            values.push(value.clone());
        }
        Ok((terms.join(" AND "), values))
    }
}

fn write_error(table_def: &TableDef, err: rusqlite::Error) -> DbError {
    if let rusqlite::Error::SqliteFailure(code, message) = &err {
        let unique = code.code == ErrorCode::ConstraintViolation
            && matches!(
                code.extended_code,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            );
        if unique {
            return DbError::Duplicate {
                table: table_def.name.to_string(),
                detail: message.clone().unwrap_or_else(|| code.to_string()),
            };
        }
    }
    DbError::Sqlite(err)
}

fn value_to_key_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(number) => number.to_string(),
        Value::Real(number) => number.to_string(),
        Value::Text(text) => text.clone(),
        Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}
