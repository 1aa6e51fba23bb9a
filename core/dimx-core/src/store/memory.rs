//! In-memory transactional backing store.
//!
//! Interprets [`Statement`]s directly over per-table row vectors. Comparison
//! follows SQL: a NULL parameter or column never matches. `commit` takes a
//! snapshot that `rollback` restores. Statement counters let tests assert
//! how many round trips an operation cost.

use crate::error::{DimxError, DimxResult};
use crate::row::{Row, Value};
use crate::staging::BulkLoad;
use crate::store::{BackingStore, ResultSet, Statement};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::cmp::Ordering;

/// Executed statement counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementStats {
    pub selects: usize,
    pub inserts: usize,
    pub updates: usize,
    pub bulk_loads: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Default)]
struct StoreState {
    tables: AHashMap<String, Vec<Row>>,
    committed: AHashMap<String, Vec<Row>>,
    stats: StatementStats,
    fail_next: Option<String>,
}

/// In-memory [`BackingStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add committed rows without counting statements.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.state.lock();
        let target = state.tables.entry(table.to_string()).or_default();
        target.extend(rows);
        let snapshot = target.clone();
        state.committed.insert(table.to_string(), snapshot);
    }

    /// Current (uncommitted included) rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> StatementStats {
        self.state.lock().stats
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = StatementStats::default();
    }

    /// Make the next `execute` or `bulk_load` fail with a store error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Reference bulk loader: appends the typed staged rows, projected onto
    /// the staged attributes. The file itself is only checked for agreement.
    pub fn bulk_load(&self, load: &BulkLoad<'_>) -> DimxResult<usize> {
        let mut state = self.state.lock();
        take_failure(&mut state)?;

        if load.file.rows() != load.rows.len() {
            return Err(DimxError::Serialization(format!(
                "staged file for '{}' has {} rows, expected {}",
                load.table,
                load.file.rows(),
                load.rows.len()
            )));
        }
        let loaded: Vec<Row> = load
            .rows
            .iter()
            .map(|row| {
                load.attributes
                    .iter()
                    .map(|att| (att.clone(), row.get(att).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        let count = loaded.len();
        state
            .tables
            .entry(load.table.to_string())
            .or_default()
            .extend(loaded);
        state.stats.bulk_loads += 1;
        Ok(count)
    }
}

fn take_failure(state: &mut StoreState) -> DimxResult<()> {
    match state.fail_next.take() {
        Some(message) => Err(DimxError::backing_store(std::io::Error::other(message))),
        None => Ok(()),
    }
}

fn param<'a>(params: &'a Row, name: &str) -> DimxResult<&'a Value> {
    params.get(name).ok_or_else(|| {
        DimxError::Configuration(format!("statement parameter ':{name}' is not bound"))
    })
}

fn matches(row: &Row, filter: &[String], params: &Row) -> DimxResult<bool> {
    for column in filter {
        let wanted = param(params, column)?;
        match row.get(column) {
            Some(v) if !v.is_null() && !wanted.is_null() && v == wanted => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn select(rows: &[&Row], columns: &[String]) -> ResultSet {
    let values = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    ResultSet::new(columns.to_vec(), values)
}

fn filtered<'a>(rows: &'a [Row], filter: &[String], params: &Row) -> DimxResult<Vec<&'a Row>> {
    let mut out = Vec::new();
    for row in rows {
        if matches(row, filter, params)? {
            out.push(row);
        }
    }
    Ok(out)
}

impl BackingStore for MemoryStore {
    fn execute(&self, statement: &Statement, params: &Row) -> DimxResult<ResultSet> {
        let mut state = self.state.lock();
        take_failure(&mut state)?;
        let state = &mut *state;
        let empty = Vec::new();

        match statement {
            Statement::SelectWhere {
                table,
                columns,
                filter,
            } => {
                state.stats.selects += 1;
                let rows = state.tables.get(table).unwrap_or(&empty);
                Ok(select(&filtered(rows, filter, params)?, columns))
            }
            Statement::SelectAll {
                table,
                columns,
                limit,
            } => {
                state.stats.selects += 1;
                let rows = state.tables.get(table).unwrap_or(&empty);
                let take = limit.unwrap_or(rows.len());
                let picked: Vec<&Row> = rows.iter().take(take).collect();
                Ok(select(&picked, columns))
            }
            Statement::SelectMax { table, column } => {
                state.stats.selects += 1;
                let max = state
                    .tables
                    .get(table)
                    .unwrap_or(&empty)
                    .iter()
                    .filter_map(|r| r.get(column))
                    .filter(|v| !v.is_null())
                    .max()
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(ResultSet::new(vec![column.clone()], vec![vec![max]]))
            }
            Statement::SelectNewest {
                table,
                columns,
                filter,
                order,
                limit,
            } => {
                state.stats.selects += 1;
                let rows = state.tables.get(table).unwrap_or(&empty);
                let mut picked = filtered(rows, filter, params)?;
                let null = Value::Null;
                picked.sort_by(|a, b| {
                    let va = a.get(&order.column).unwrap_or(&null);
                    let vb = b.get(&order.column).unwrap_or(&null);
                    let ord = match (va.is_null(), vb.is_null()) {
                        (true, true) => Ordering::Equal,
                        (true, false) if order.nulls_first => Ordering::Greater,
                        (true, false) => Ordering::Less,
                        (false, true) if order.nulls_first => Ordering::Less,
                        (false, true) => Ordering::Greater,
                        (false, false) => va.cmp(vb),
                    };
                    ord.reverse()
                });
                picked.truncate(*limit);
                Ok(select(&picked, columns))
            }
            Statement::Insert {
                table,
                columns,
                returning,
            } => {
                state.stats.inserts += 1;
                let target = state.tables.entry(table.clone()).or_default();
                let mut row: Row = columns
                    .iter()
                    .map(|c| (c.clone(), params.get(c).cloned().unwrap_or(Value::Null)))
                    .collect();
                let Some(ret) = returning else {
                    target.push(row);
                    return Ok(ResultSet::affected(1));
                };
                let assigned = match params.get(ret) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => {
                        let max = target
                            .iter()
                            .filter_map(|r| r.get(ret).and_then(Value::as_int))
                            .max()
                            .unwrap_or(0);
                        Value::Int(max + 1)
                    }
                };
                row.set(ret.clone(), assigned.clone());
                target.push(row);
                Ok(ResultSet::new(vec![ret.clone()], vec![vec![assigned]]))
            }
            Statement::UpdateByKey {
                table,
                key,
                columns,
            } => {
                state.stats.updates += 1;
                let filter = std::slice::from_ref(key);
                update(state, table, columns, filter, params)
            }
            Statement::UpdateWhere {
                table,
                columns,
                filter,
            } => {
                state.stats.updates += 1;
                update(state, table, columns, filter, params)
            }
        }
    }

    fn commit(&self) -> DimxResult<()> {
        let mut state = self.state.lock();
        take_failure(&mut state)?;
        state.committed = state.tables.clone();
        state.stats.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> DimxResult<()> {
        let mut state = self.state.lock();
        state.tables = state.committed.clone();
        state.stats.rollbacks += 1;
        Ok(())
    }
}

fn update(
    state: &mut StoreState,
    table: &str,
    columns: &[String],
    filter: &[String],
    params: &Row,
) -> DimxResult<ResultSet> {
    let mut assignments = Vec::with_capacity(columns.len());
    for column in columns {
        assignments.push((column.clone(), param(params, column)?.clone()));
    }
    let Some(rows) = state.tables.get_mut(table) else {
        return Ok(ResultSet::affected(0));
    };
    let mut affected = 0;
    for row in rows.iter_mut() {
        if matches(row, filter, params)? {
            for (column, value) in &assignments {
                row.set(column.clone(), value.clone());
            }
            affected += 1;
        }
    }
    Ok(ResultSet::affected(affected))
}
