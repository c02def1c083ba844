/// Result Set Module
///
/// `ResultSet` is a forward-only cursor over one query's rows. Rows are
/// materialized when the statement executes (the embedded driver's cursor
/// borrows the connection, and the pool must be free to take the
/// connection back independently of result consumption); `next()` advances
/// an index over the buffer, preserving the cursor contract.
///
/// Cells are `SqlValue`s produced by declared-type dispatch at execution
/// time; the typed getters apply the value coercion rules, so a TEXT "42"
/// reads cleanly through `get_i64` and an unsupported coercion is a hard
/// error rather than a default.
use crate::core::{QuarryError, Result};
use crate::value::SqlValue;
use chrono::NaiveDateTime;

/// A buffered, forward-only cursor over query results.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    /// Cursor position; None before the first `next()`.
    cursor: Option<usize>,
}

impl ResultSet {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        ResultSet {
            columns,
            rows,
            cursor: None,
        }
    }

    /// Advances to the next row. Returns false once the rows are
    /// exhausted; the cursor never moves backwards.
    pub fn next(&mut self) -> bool {
        let next = match self.cursor {
            None => 0,
            Some(i) => i + 1,
        };
        if next < self.rows.len() {
            self.cursor = Some(next);
            true
        } else {
            self.cursor = Some(self.rows.len());
            false
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Total number of buffered rows, independent of cursor position.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn current_row(&self) -> Result<&Vec<SqlValue>> {
        match self.cursor {
            Some(i) if i < self.rows.len() => Ok(&self.rows[i]),
            Some(_) => Err(QuarryError::Query(
                "cursor is past the last row".to_string(),
            )),
            None => Err(QuarryError::Query(
                "cursor is before the first row; call next() first".to_string(),
            )),
        }
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| QuarryError::Query(format!("no such column: {name}")))
    }

    /// The raw tagged value in the named column of the current row.
    pub fn value(&self, column: &str) -> Result<&SqlValue> {
        let idx = self.column_index(column)?;
        self.value_at(idx)
    }

    /// The raw tagged value at a zero-based column index.
    pub fn value_at(&self, index: usize) -> Result<&SqlValue> {
        let row = self.current_row()?;
        row.get(index)
            .ok_or_else(|| QuarryError::Query(format!("column index {index} out of range")))
    }

    pub fn get_i32(&self, column: &str) -> Result<i32> {
        self.value(column)?.to_i32()
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.value(column)?.to_i64()
    }

    pub fn get_u64(&self, column: &str) -> Result<u64> {
        self.value(column)?.to_u64()
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        self.value(column)?.to_f64()
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        self.value(column)?.to_text()
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        self.value(column)?.to_bool()
    }

    pub fn get_timestamp(&self, column: &str) -> Result<NaiveDateTime> {
        self.value(column)?.to_timestamp()
    }

    /// The current row as ordered (column, value) pairs, in projection
    /// order. Used by the model layer to hydrate attribute maps.
    pub fn row_pairs(&self) -> Result<Vec<(String, SqlValue)>> {
        let row = self.current_row()?;
        Ok(self
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect())
    }
}
