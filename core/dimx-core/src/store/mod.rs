//! Backing store seam.
//!
//! Every dimension talks to its relational store through the
//! [`BackingStore`] trait. The engine never builds or parses SQL text on its
//! own behalf: it emits typed [`Statement`]s together with a params [`Row`]
//! and the store decides how to execute them. [`Statement::to_sql`] renders
//! a `:name` placeholder form for stores that forward to a SQL driver.
//!
//! # Contract
//!
//! - `execute`: runs one statement. Select statements return their rows in
//!   the requested column order; insert and update statements report the
//!   number of affected rows, and an insert with `returning` yields the
//!   store-assigned value.
//! - `commit` / `rollback`: owned by the caller. Dimensions never call them;
//!   `end_load` must run before `commit` or staged rows are lost.
//! - Errors from the driver are wrapped in [`DimxError::BackingStore`] and
//!   propagated unchanged.
//!
//! [`DimxError::BackingStore`]: crate::error::DimxError::BackingStore

pub mod memory;
pub mod statement;

pub use memory::{MemoryStore, StatementStats};
pub use statement::{OrderBy, Statement};

use crate::error::DimxResult;
use crate::row::{Row, Value};

/// Relational store a dimension reads from and writes to.
///
/// Shared between dimensions as `Arc<dyn BackingStore>`.
pub trait BackingStore: Send + Sync {
    /// Execute a parameterized statement.
    fn execute(&self, statement: &Statement, params: &Row) -> DimxResult<ResultSet>;

    /// Commit the current transaction.
    fn commit(&self) -> DimxResult<()>;

    /// Roll back the current transaction.
    fn rollback(&self) -> DimxResult<()>;
}

/// Rows returned by a statement, with a known column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    affected: usize,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let affected = rows.len();
        Self {
            columns,
            rows,
            affected,
        }
    }

    /// Result of a statement that returns no rows.
    pub fn affected(count: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected: count,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn affected_rows(&self) -> usize {
        self.affected
    }

    /// Value of `column` in the row at `index`.
    pub fn value(&self, index: usize, column: &str) -> Option<&Value> {
        let pos = self.columns.iter().position(|c| c == column)?;
        self.rows.get(index).and_then(|r| r.get(pos))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.rows.iter().map(|values| {
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect()
        })
    }

    pub fn first(&self) -> Option<Row> {
        self.rows().next()
    }

    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }
}
