//! CSV decoding
//!
//! Fields are read as opaque text so that values like `007` or `1e5` survive
//! untouched. Cells matching the usual null spellings become null.

use std::collections::HashMap;

use super::LoadFailure;
use crate::table::{Cell, Table};

/// Spellings treated as missing values.
const NULL_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub fn is_null_token(value: &str) -> bool {
    NULL_TOKENS.contains(&value)
}

fn to_cell(value: &str) -> Cell {
    if is_null_token(value) {
        None
    } else {
        Some(value.to_string())
    }
}

/// Repeated header names get `.1`, `.2`, ... suffixes.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            let count = seen.entry(header.clone()).or_insert(0);
            let name = if *count == 0 {
                header
            } else {
                format!("{}.{}", header, count)
            };
            *count += 1;
            name
        })
        .collect()
}

pub fn read_csv(data: &[u8]) -> Result<Table, LoadFailure> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(data);

    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| LoadFailure::Rejected(format!("unreadable CSV header: {}", e)))?
        .clone();
    if headers.is_empty() {
        return Err(LoadFailure::Rejected("no columns to parse from file".to_string()));
    }

    let columns = dedupe_headers(headers.iter().map(str::to_string).collect());
    let width = columns.len();
    let mut table = Table::new(columns);

    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| LoadFailure::Rejected(format!("unreadable CSV record: {}", e)))?;
        if record.len() > width {
            return Err(LoadFailure::Rejected(format!(
                "expected {} fields in record {}, saw {}",
                width,
                line + 1,
                record.len()
            )));
        }
        table.push_row(record.iter().map(to_cell).collect());
    }

    Ok(table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_stay_text() {
        let table = read_csv(b"id,code,amount\n007,1e5,10.50\n").unwrap();
        assert_eq!(table.columns(), &["id", "code", "amount"]);
        assert_eq!(
            table.rows()[0],
            vec![Some("007".into()), Some("1e5".into()), Some("10.50".into())]
        );
    }

    #[test]
    fn test_null_spellings_become_null() {
        let table = read_csv(b"a,b,c,d\n,NA,null,x\n").unwrap();
        assert_eq!(table.rows()[0], vec![None, None, None, Some("x".into())]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = read_csv(b"a,b,c\n1,2\n").unwrap();
        assert_eq!(table.rows()[0], vec![Some("1".into()), Some("2".into()), None]);
    }

    #[test]
    fn test_long_rows_are_rejected() {
        let err = read_csv(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, LoadFailure::Rejected(_)));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(matches!(read_csv(b"").unwrap_err(), LoadFailure::Rejected(_)));
    }

    #[test]
    fn test_bom_and_duplicate_headers() {
        let table = read_csv(b"\xEF\xBB\xBFid,name,name\n1,a,b\n").unwrap();
        assert_eq!(table.columns(), &["id", "name", "name.1"]);
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let err = read_csv(b"name\n\xff\xfe\n").unwrap_err();
        assert!(matches!(err, LoadFailure::Rejected(_)));
    }
}
