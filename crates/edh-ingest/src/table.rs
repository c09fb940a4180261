//! In-memory tabular data
//!
//! Every cell is text or null. Source files are read without type inference
//! and the lake stores every column as a string, so there is nothing to gain
//! from typed columns here.

use std::collections::HashMap;

pub type Cell = Option<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build from rows, padding short rows with nulls and truncating long ones.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, None);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].as_deref()).collect())
    }

    pub fn remove_column(&mut self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => {
                self.columns.remove(idx);
                for row in &mut self.rows {
                    row.remove(idx);
                }
                true
            },
            None => false,
        }
    }

    /// Insert a column holding `value` in every row at `position` (clamped to
    /// the current width). An existing column of the same name is replaced.
    pub fn insert_constant_column(&mut self, position: usize, name: &str, value: Cell) {
        self.remove_column(name);
        let position = position.min(self.columns.len());
        self.columns.insert(position, name.to_string());
        for row in &mut self.rows {
            row.insert(position, value.clone());
        }
    }

    pub fn rename_columns<F>(&mut self, mut rename: F)
    where
        F: FnMut(&str) -> String,
    {
        for column in &mut self.columns {
            *column = rename(column);
        }
    }

    /// Stack tables by column name. The result carries the union of columns
    /// in first-seen order; cells a table lacks are null. No input yields an
    /// empty table.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for table in &tables {
            for column in &table.columns {
                if !positions.contains_key(column) {
                    positions.insert(column.clone(), columns.len());
                    columns.push(column.clone());
                }
            }
        }

        let width = columns.len();
        let mut rows = Vec::with_capacity(tables.iter().map(Table::num_rows).sum());
        for table in tables {
            let mapping: Vec<usize> = table.columns.iter().map(|c| positions[c]).collect();
            for row in table.rows {
                let mut out: Vec<Cell> = vec![None; width];
                for (cell, &target) in row.into_iter().zip(&mapping) {
                    out[target] = cell;
                }
                rows.push(out);
            }
        }

        Table { columns, rows }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_insert_clamps_and_replaces() {
        let mut table = Table::from_rows(names(&["id", "amount"]), vec![cells(&["1", "9.5"])]);

        table.insert_constant_column(10, "region", Some("US".into()));
        assert_eq!(table.columns(), &names(&["id", "amount", "region"])[..]);

        table.insert_constant_column(0, "region", Some("CA".into()));
        assert_eq!(table.columns(), &names(&["region", "id", "amount"])[..]);
        assert_eq!(table.column_values("region").unwrap(), vec![Some("CA")]);
    }

    #[test]
    fn test_concat_aligns_by_name() {
        let a = Table::from_rows(names(&["id", "name"]), vec![cells(&["1", "ann"])]);
        let b = Table::from_rows(names(&["name", "city"]), vec![cells(&["bob", "Oslo"])]);

        let merged = Table::concat(vec![a, b]);
        assert_eq!(merged.columns(), &names(&["id", "name", "city"])[..]);
        assert_eq!(merged.rows()[0], vec![Some("1".into()), Some("ann".into()), None]);
        assert_eq!(merged.rows()[1], vec![None, Some("bob".into()), Some("Oslo".into())]);
    }

    #[test]
    fn test_concat_of_nothing_is_empty() {
        let merged = Table::concat(Vec::new());
        assert!(merged.is_empty());
        assert_eq!(merged.num_columns(), 0);
    }

    #[test]
    fn test_from_rows_pads_short_rows() {
        let table = Table::from_rows(names(&["a", "b"]), vec![cells(&["1"])]);
        assert_eq!(table.rows()[0], vec![Some("1".into()), None]);
    }
}
