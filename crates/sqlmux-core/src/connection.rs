//! Backend SQL engine traits.
//!
//! This module defines what a session needs from the database it forwards to:
//!
//! - [`Backend`] - prepare/execute/query, transactions, liveness
//! - [`Cursor`] - an open result set with column metadata
//! - [`Arguments`] - positional or named bind arguments
//!
//! All operations integrate with asupersync's structured concurrency via `Cx` context
//! for proper cancellation and timeout handling.

use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};

/// Column metadata reported by an open cursor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name (or alias)
    pub name: String,
    /// Database type name as the driver reports it (e.g. "VARCHAR")
    pub type_name: String,
    /// Declared width, 0 if none
    pub length: i64,
    /// Declared precision, 0 if none
    pub precision: i64,
    /// Declared scale, 0 if none
    pub scale: i64,
    pub nullable: bool,
}

impl ColumnMeta {
    /// Create column metadata with only a name and type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Set the declared width.
    pub fn length(mut self, length: i64) -> Self {
        self.length = length;
        self
    }

    /// Set precision and scale.
    pub fn precision_scale(mut self, precision: i64, scale: i64) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Mark the column nullable.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Direction-tagged value inside a named argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Input value
    In(Value),
    /// Output destination; the backend fills it in [`ExecResult::out_values`]
    Out,
}

/// One `name => value` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArg {
    /// Placeholder name without the leading colon
    pub name: String,
    pub value: ArgValue,
}

/// Bind arguments for one execute or query call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arguments {
    /// Values in placeholder order
    Positional(Vec<Value>),
    /// Values keyed by placeholder name, in placeholder order
    Named(Vec<NamedArg>),
}

impl Arguments {
    /// Number of arguments.
    pub fn len(&self) -> usize {
        match self {
            Arguments::Positional(v) => v.len(),
            Arguments::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of output destinations.
    pub fn out_count(&self) -> usize {
        match self {
            Arguments::Positional(_) => 0,
            Arguments::Named(v) => v.iter().filter(|a| a.value == ArgValue::Out).count(),
        }
    }
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::Positional(Vec::new())
    }
}

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key, when the backend reports one
    pub last_insert_id: Option<u64>,
    /// One value per [`ArgValue::Out`] argument, in argument order
    pub out_values: Vec<Value>,
}

impl ExecResult {
    /// Result carrying only an affected-row count.
    pub fn rows(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }
}

/// An open result set.
///
/// Cursors are owned by the session and live until fully fetched, replaced,
/// or dropped at teardown.
pub trait Cursor: Send {
    /// Column metadata, in column order.
    fn columns(&self) -> &[ColumnMeta];

    /// Pull the next row. `Ok(None)` marks end of data.
    fn next_row(&mut self, cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, crate::Error>> + Send;
}

/// The backend SQL engine a session forwards to.
///
/// A backend is one checked-out database connection; a session holds it for
/// its whole life and never shares it.
pub trait Backend: Send {
    /// A prepared statement handle.
    type Statement: Send;
    /// An open cursor.
    type Cursor: Cursor;
    /// An open transaction handle.
    type Transaction: Send;

    /// Prepare SQL text (placeholders already rewritten for this backend).
    fn prepare(
        &mut self,
        cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<Self::Statement, crate::Error>> + Send;

    /// Run a statement that returns no rows.
    fn execute(
        &mut self,
        cx: &Cx,
        stmt: &Self::Statement,
        args: &Arguments,
    ) -> impl Future<Output = Outcome<ExecResult, crate::Error>> + Send;

    /// Run a statement that returns rows.
    fn query(
        &mut self,
        cx: &Cx,
        stmt: &Self::Statement,
        args: &Arguments,
    ) -> impl Future<Output = Outcome<Self::Cursor, crate::Error>> + Send;

    /// Release a prepared statement.
    fn close_statement(
        &mut self,
        cx: &Cx,
        stmt: Self::Statement,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Open a transaction.
    fn begin(&mut self, cx: &Cx)
    -> impl Future<Output = Outcome<Self::Transaction, crate::Error>> + Send;

    /// Commit a transaction.
    fn commit(
        &mut self,
        cx: &Cx,
        tx: Self::Transaction,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Roll back a transaction.
    fn rollback(
        &mut self,
        cx: &Cx,
        tx: Self::Transaction,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Check that the connection is alive.
    fn ping(&mut self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_counts() {
        let args = Arguments::Named(vec![
            NamedArg {
                name: "a".into(),
                value: ArgValue::In(Value::Int(1)),
            },
            NamedArg {
                name: "b".into(),
                value: ArgValue::Out,
            },
        ]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.out_count(), 1);
        assert!(Arguments::default().is_empty());
        assert_eq!(Arguments::Positional(vec![Value::Null]).out_count(), 0);
    }

    #[test]
    fn test_column_meta_builder() {
        let col = ColumnMeta::new("price", "DECIMAL")
            .length(12)
            .precision_scale(10, 2)
            .nullable(true);
        assert_eq!(col.name, "price");
        assert_eq!(col.precision, 10);
        assert_eq!(col.scale, 2);
        assert!(col.nullable);
    }
}
