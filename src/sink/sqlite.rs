//! Relational sink backed by SQLite.
//!
//! Tables are created on the first append from the batch's columns; columns
//! that show up in later batches are added with `ALTER TABLE`. Each batch is
//! inserted inside one transaction.

use super::{check_table_name, RowSink, RowSource};
use crate::record::{column_union, ResultRecord};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tracing::debug;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Self::Int(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Self::Float(x) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*x)),
            Self::Str(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Str(String::from_utf8_lossy(t).into_owned()),
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_type(rows: &[ResultRecord], column: &str) -> &'static str {
    let first = rows
        .iter()
        .map(|r| r.get_or_null(column))
        .find(|v| !v.is_null());
    match first {
        Some(Value::Bool(_) | Value::Int(_)) => "INTEGER",
        Some(Value::Float(_)) => "REAL",
        Some(Value::Str(_)) => "TEXT",
        Some(Value::Null) | None => "",
    }
}

/// SQLite relational sink.
#[derive(Debug)]
pub struct SqliteSink {
    conn: Option<Connection>,
}

impl SqliteSink {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Private in-memory database.
    ///
    /// # Errors
    /// Returns error if SQLite cannot allocate the database
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap a caller-configured connection.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    /// Underlying connection, `None` once closed.
    #[must_use]
    pub const fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::SinkClosed)
    }

    fn existing_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

impl RowSink for SqliteSink {
    fn append(&mut self, table: &str, rows: &[ResultRecord]) -> Result<()> {
        check_table_name(table)?;
        if rows.is_empty() {
            return Ok(());
        }
        let conn = self.conn.as_mut().ok_or(Error::SinkClosed)?;
        let columns = column_union(rows);
        let existing = Self::existing_columns(conn, table)?;

        let tx = conn.transaction()?;
        if existing.is_empty() {
            let defs: Vec<String> = columns
                .iter()
                .map(|c| format!("{} {}", quote(c), sql_type(rows, c)).trim_end().to_string())
                .collect();
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({});",
                quote(table),
                defs.join(", ")
            ))?;
        } else {
            for column in columns.iter().filter(|c| !existing.contains(c)) {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    quote(table),
                    quote(column),
                    sql_type(rows, column)
                ))?;
            }
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                quote(table),
                names.join(", ")
            ))?;
            for row in rows {
                stmt.execute(params_from_iter(columns.iter().map(|c| row.get_or_null(c))))?;
            }
        }
        tx.commit()?;

        debug!(table, rows = rows.len(), "inserted rows into sqlite");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
        }
        Ok(())
    }
}

impl RowSource for SqliteSink {
    fn select(&self, table: &str, columns: &[String]) -> Result<Option<Vec<ResultRecord>>> {
        check_table_name(table)?;
        let conn = self.conn()?;
        let existing = Self::existing_columns(conn, table)?;
        if existing.is_empty() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            existing.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            quote(table)
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let mut record = ResultRecord::new();
                for (i, name) in existing.iter().enumerate() {
                    record.set(name.clone(), from_sql(row.get_ref(i)?));
                }
                Ok(record)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if columns.is_empty() {
            Ok(Some(rows))
        } else {
            Ok(Some(rows.iter().map(|r| r.project(columns)).collect()))
        }
    }
}
