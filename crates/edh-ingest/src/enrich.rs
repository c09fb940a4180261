//! EDH columns and column-name normalisation
//!
//! Inbound filenames carry metadata as `_`-separated tokens, e.g.
//! `US_true_20240101.csv`. The job's `file_name_2_columns` description maps
//! column names to a token (`file_order`) and a position in the lake table
//! (`lake_order`):
//!
//! - `lake_order >= 0`: inserted near the front at `lake_order - 1`
//!   (1-based), ascending
//! - `lake_order < 0`: inserted from the tail at `len + lake_order + 1`,
//!   ascending, so `-1` appends
//!
//! After insertion every column name goes through the `replace_chars` rules.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::table::Table;

/// One filename-derived column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdhColumn {
    pub name: String,
    /// Index into the `_`-split filename stem
    pub file_order: usize,
    pub lake_order: i64,
}

/// One `replace_chars` entry. A `?` pattern is special: a name containing it
/// becomes `is_<name without ?>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRule {
    pub pattern: String,
    pub replacement: String,
}

impl ReplaceRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("column '{column}' wants filename token {file_order} but '{stem}' has {available}")]
    MissingToken {
        column: String,
        file_order: usize,
        stem: String,
        available: usize,
    },

    #[error("columns collide as '{column}' after renaming")]
    DuplicateColumn { column: String },
}

/// Filename with its final extension removed.
pub fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// A column name/value pair with its lake position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedColumn {
    pub name: String,
    pub value: String,
    pub lake_order: i64,
}

/// Split the description into (start, end) column sets for one file, each
/// sorted by `lake_order`.
pub fn edh_columns_for(
    columns: &[EdhColumn],
    file_name: &str,
) -> Result<(Vec<PlacedColumn>, Vec<PlacedColumn>), EnrichError> {
    let stem = file_stem(file_name);
    let tokens: Vec<&str> = stem.split('_').collect();

    let mut start = Vec::new();
    let mut end = Vec::new();
    for column in columns {
        let value = tokens
            .get(column.file_order)
            .ok_or_else(|| EnrichError::MissingToken {
                column: column.name.clone(),
                file_order: column.file_order,
                stem: stem.to_string(),
                available: tokens.len(),
            })?;

        let placed = PlacedColumn {
            name: column.name.clone(),
            value: value.to_string(),
            lake_order: column.lake_order,
        };
        if column.lake_order >= 0 {
            start.push(placed);
        } else {
            end.push(placed);
        }
    }

    start.sort_by_key(|c| c.lake_order);
    end.sort_by_key(|c| c.lake_order);
    Ok((start, end))
}

/// Insert the placed columns into `table`.
pub fn set_edh_columns(table: &mut Table, start: &[PlacedColumn], end: &[PlacedColumn]) {
    for column in start {
        let position = (column.lake_order - 1).max(0) as usize;
        table.insert_constant_column(position, &column.name, Some(column.value.clone()));
    }

    for column in end {
        let width = table.num_columns() as i64;
        let position = (width + column.lake_order + 1).max(0) as usize;
        table.insert_constant_column(position, &column.name, Some(column.value.clone()));
    }
}

/// Apply `rules` in order, then lower-case.
pub fn normalize_column_name(raw: &str, rules: &[ReplaceRule]) -> String {
    let mut name = raw.to_string();
    for rule in rules {
        if rule.pattern == "?" && name.contains('?') {
            name = format!("is_{}", name.replace('?', ""));
        } else if !rule.pattern.is_empty() {
            name = name.replace(&rule.pattern, &rule.replacement);
        }
    }
    name.to_lowercase()
}

/// Add the EDH columns for `file_name` and normalise every column name.
///
/// Two columns that end up with the same normalised name are an error; the
/// lake cannot hold both.
pub fn enrich_table(
    table: &mut Table,
    file_name: &str,
    columns: &[EdhColumn],
    rules: &[ReplaceRule],
) -> Result<(), EnrichError> {
    let (start, end) = edh_columns_for(columns, file_name)?;
    set_edh_columns(table, &start, &end);
    table.rename_columns(|name| normalize_column_name(name, rules));

    let mut seen = HashSet::new();
    for column in table.columns() {
        if !seen.insert(column.as_str()) {
            return Err(EnrichError::DuplicateColumn {
                column: column.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn column(name: &str, file_order: usize, lake_order: i64) -> EdhColumn {
        EdhColumn {
            name: name.to_string(),
            file_order,
            lake_order,
        }
    }

    fn table(columns: &[&str]) -> Table {
        Table::from_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            vec![columns.iter().map(|c| Some(format!("{}-value", c))).collect()],
        )
    }

    #[test]
    fn test_rename_question_mark_rule_runs_first() {
        let rules = vec![ReplaceRule::new("?", ""), ReplaceRule::new(" ", "_")];
        assert_eq!(normalize_column_name("Is Active?", &rules), "is_is_active");
    }

    #[test]
    fn test_rename_rule_order_matters() {
        let forward = vec![ReplaceRule::new(" ", "_"), ReplaceRule::new("_", "")];
        let backward = vec![ReplaceRule::new("_", ""), ReplaceRule::new(" ", "_")];
        assert_eq!(normalize_column_name("Order Id", &forward), "orderid");
        assert_eq!(normalize_column_name("Order Id", &backward), "order_id");
    }

    #[test]
    fn test_rename_without_question_mark_is_literal() {
        let rules = vec![ReplaceRule::new("?", ""), ReplaceRule::new("-", "_")];
        assert_eq!(normalize_column_name("Ship-Date", &rules), "ship_date");
    }

    #[test]
    fn test_region_and_flag_columns() {
        let columns = vec![column("region", 0, 1), column("flag?", 1, -1)];
        let rules = vec![ReplaceRule::new("?", ""), ReplaceRule::new(" ", "_")];
        let mut t = table(&["Order Id", "Amount"]);

        enrich_table(&mut t, "US_true_20240101.csv", &columns, &rules).unwrap();

        assert_eq!(t.columns(), &["region", "order_id", "amount", "is_flag"]);
        assert_eq!(t.column_values("region").unwrap(), vec![Some("US")]);
        assert_eq!(t.column_values("is_flag").unwrap(), vec![Some("true")]);
    }

    #[test]
    fn test_start_columns_in_ascending_order() {
        let columns = vec![column("b", 1, 2), column("a", 0, 1)];
        let mut t = table(&["x", "y"]);
        let (start, end) = edh_columns_for(&columns, "p_q_20240101.dbf").unwrap();
        set_edh_columns(&mut t, &start, &end);
        assert_eq!(t.columns(), &["a", "b", "x", "y"]);
    }

    #[test]
    fn test_end_columns_offset_from_tail() {
        let columns = vec![column("last", 0, -1), column("second_last", 1, -2)];
        let mut t = table(&["x", "y"]);
        let (start, end) = edh_columns_for(&columns, "p_q_20240101.csv").unwrap();
        set_edh_columns(&mut t, &start, &end);
        // -2 goes in first (ascending), one before the tail; -1 then appends
        assert_eq!(t.columns(), &["x", "second_last", "y", "last"]);
    }

    #[test]
    fn test_missing_token_is_reported() {
        let columns = vec![column("region", 3, 1)];
        let err = edh_columns_for(&columns, "US_20240101.csv").unwrap_err();
        assert_eq!(
            err,
            EnrichError::MissingToken {
                column: "region".to_string(),
                file_order: 3,
                stem: "US_20240101".to_string(),
                available: 2,
            }
        );
    }

    #[test]
    fn test_edh_column_colliding_with_data_column() {
        let columns = vec![column("region", 0, 1)];
        let mut t = table(&["Region", "amount"]);

        let err = enrich_table(&mut t, "US_20240101.csv", &columns, &[]).unwrap_err();
        assert_eq!(
            err,
            EnrichError::DuplicateColumn {
                column: "region".to_string()
            }
        );
    }

    #[test]
    fn test_headers_colliding_after_rename() {
        let rules = vec![ReplaceRule::new(" ", "_")];
        let mut t = table(&["Order Id", "order_id"]);

        let err = enrich_table(&mut t, "US_20240101.csv", &[], &rules).unwrap_err();
        assert!(matches!(err, EnrichError::DuplicateColumn { column } if column == "order_id"));
    }

    #[test]
    fn test_file_stem_drops_only_last_extension() {
        assert_eq!(file_stem("US_20240101.csv"), "US_20240101");
        assert_eq!(file_stem("US_20240101.csv.gz"), "US_20240101.csv");
        assert_eq!(file_stem("README"), "README");
    }
}
