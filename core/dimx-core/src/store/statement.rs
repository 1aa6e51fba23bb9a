//! Typed statements emitted by dimensions.
//!
//! Parameters are bound by attribute name: every placeholder `:name` in the
//! rendered SQL refers to the attribute `name` of the params row passed
//! alongside the statement.

use crate::schema::Quote;

/// Descending order used to find the newest version of a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    /// Sort NULL before every other value (NULL counts as the greatest).
    pub nulls_first: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `SELECT columns FROM table WHERE f1 = :f1 AND ...`
    SelectWhere {
        table: String,
        columns: Vec<String>,
        filter: Vec<String>,
    },
    /// `SELECT columns FROM table [FETCH FIRST n ROWS ONLY]`
    SelectAll {
        table: String,
        columns: Vec<String>,
        limit: Option<usize>,
    },
    /// `SELECT MAX(column) FROM table`, one row holding NULL when empty
    SelectMax { table: String, column: String },
    /// `SelectWhere` ordered by `order` descending, limited to `limit` rows
    SelectNewest {
        table: String,
        columns: Vec<String>,
        filter: Vec<String>,
        order: OrderBy,
        limit: usize,
    },
    /// `INSERT INTO table (columns) VALUES (:c1, ...) [RETURNING r]`
    Insert {
        table: String,
        columns: Vec<String>,
        returning: Option<String>,
    },
    /// `UPDATE table SET c1 = :c1, ... WHERE key = :key`
    UpdateByKey {
        table: String,
        key: String,
        columns: Vec<String>,
    },
    /// `UPDATE table SET c1 = :c1, ... WHERE f1 = :f1 AND ...`
    ///
    /// `columns` and `filter` must not share names.
    UpdateWhere {
        table: String,
        columns: Vec<String>,
        filter: Vec<String>,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::SelectWhere { table, .. }
            | Statement::SelectAll { table, .. }
            | Statement::SelectMax { table, .. }
            | Statement::SelectNewest { table, .. }
            | Statement::Insert { table, .. }
            | Statement::UpdateByKey { table, .. }
            | Statement::UpdateWhere { table, .. } => table,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(
            self,
            Statement::SelectWhere { .. }
                | Statement::SelectAll { .. }
                | Statement::SelectMax { .. }
                | Statement::SelectNewest { .. }
        )
    }

    /// Render SQL text with `:name` placeholders.
    pub fn to_sql(&self, quote: &Quote) -> String {
        match self {
            Statement::SelectWhere {
                table,
                columns,
                filter,
            } => format!(
                "SELECT {} FROM {table}{}",
                quote.quote_list(columns),
                where_clause(quote, filter)
            ),
            Statement::SelectAll {
                table,
                columns,
                limit,
            } => {
                let mut sql = format!("SELECT {} FROM {table}", quote.quote_list(columns));
                if let Some(n) = limit {
                    sql.push_str(&format!(" FETCH FIRST {n} ROWS ONLY"));
                }
                sql
            }
            Statement::SelectMax { table, column } => {
                format!("SELECT MAX({}) FROM {table}", quote.quote(column))
            }
            Statement::SelectNewest {
                table,
                columns,
                filter,
                order,
                limit,
            } => format!(
                "SELECT {} FROM {table}{} ORDER BY {} DESC NULLS {} FETCH FIRST {limit} ROWS ONLY",
                quote.quote_list(columns),
                where_clause(quote, filter),
                quote.quote(&order.column),
                if order.nulls_first { "FIRST" } else { "LAST" }
            ),
            Statement::Insert {
                table,
                columns,
                returning,
            } => {
                let placeholders = columns
                    .iter()
                    .map(|c| format!(":{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!(
                    "INSERT INTO {table} ({}) VALUES ({placeholders})",
                    quote.quote_list(columns)
                );
                if let Some(r) = returning {
                    sql.push_str(&format!(" RETURNING {}", quote.quote(r)));
                }
                sql
            }
            Statement::UpdateByKey {
                table,
                key,
                columns,
            } => format!(
                "UPDATE {table} SET {}{}",
                assignments(quote, columns),
                where_clause(quote, std::slice::from_ref(key))
            ),
            Statement::UpdateWhere {
                table,
                columns,
                filter,
            } => format!(
                "UPDATE {table} SET {}{}",
                assignments(quote, columns),
                where_clause(quote, filter)
            ),
        }
    }
}

fn assignments(quote: &Quote, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{} = :{c}", quote.quote(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(quote: &Quote, filter: &[String]) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let conditions = filter
        .iter()
        .map(|c| format!("{} = :{c}", quote.quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {conditions}")
}
