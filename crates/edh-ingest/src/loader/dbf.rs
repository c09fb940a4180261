//! dBASE (DBF) decoding
//!
//! Layout:
//!
//! ```text
//! 0      32-byte header: version, date, record count (u32 LE),
//!        header length (u16 LE), record length (u16 LE)
//! 32     32-byte field descriptors: name[11], type, 4 reserved, length, decimals
//! ...    0x0D terminator
//! hdr    records: 1 deletion-flag byte + fixed-width fields
//! ```
//!
//! Text is Latin-1. Failures split in two:
//!
//! - [`DbfError::Truncated`]: the bytes end before a section that the header
//!   promises. Usually a partial upload, so the file is retried later.
//! - [`DbfError::Layout`]: the header contradicts itself. The file will never
//!   decode and is set aside as corrupt.

use thiserror::Error;

use super::LoadFailure;
use crate::table::{Cell, Table};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const TERMINATOR: u8 = 0x0D;
const ACTIVE_RECORD: u8 = b' ';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DbfError {
    #[error("truncated {section}: need {needed} bytes at offset {offset}, file has {available}")]
    Truncated {
        section: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid layout: {0}")]
    Layout(String),
}

impl From<DbfError> for LoadFailure {
    fn from(err: DbfError) -> Self {
        match err {
            DbfError::Truncated { .. } => LoadFailure::Rejected(err.to_string()),
            DbfError::Layout(_) => LoadFailure::Corrupt(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: u8,
    pub length: usize,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    record_count: usize,
    header_len: usize,
    record_len: usize,
}

fn take<'a>(
    data: &'a [u8],
    offset: usize,
    needed: usize,
    section: &'static str,
) -> Result<&'a [u8], DbfError> {
    data.get(offset..offset + needed)
        .ok_or(DbfError::Truncated {
            section,
            offset,
            needed,
            available: data.len(),
        })
}

/// Latin-1 maps every byte straight to the code point of the same value.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn read_header(data: &[u8]) -> Result<Header, DbfError> {
    let raw = take(data, 0, HEADER_LEN, "header")?;
    Ok(Header {
        record_count: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize,
        header_len: u16::from_le_bytes([raw[8], raw[9]]) as usize,
        record_len: u16::from_le_bytes([raw[10], raw[11]]) as usize,
    })
}

fn read_fields(data: &[u8], header: &Header) -> Result<Vec<FieldDescriptor>, DbfError> {
    if header.header_len < HEADER_LEN + 1 {
        return Err(DbfError::Layout(format!(
            "header length {} is shorter than the fixed header",
            header.header_len
        )));
    }

    let count = (header.header_len - HEADER_LEN - 1) / DESCRIPTOR_LEN;
    let mut fields = Vec::with_capacity(count);
    for i in 0..count {
        let raw = take(data, HEADER_LEN + i * DESCRIPTOR_LEN, DESCRIPTOR_LEN, "field descriptor")?;
        let name_end = raw[..11].iter().position(|&b| b == 0).unwrap_or(11);
        fields.push(FieldDescriptor {
            name: latin1(&raw[..name_end]).trim().to_string(),
            kind: raw[11],
            length: raw[16] as usize,
            decimals: raw[17],
        });
    }

    let terminator_at = HEADER_LEN + count * DESCRIPTOR_LEN;
    if data.get(terminator_at) != Some(&TERMINATOR) {
        return Err(DbfError::Layout(format!(
            "missing 0x0D header terminator at offset {}",
            terminator_at
        )));
    }

    let expected_record_len = 1 + fields.iter().map(|f| f.length).sum::<usize>();
    if expected_record_len != header.record_len {
        return Err(DbfError::Layout(format!(
            "record length {} does not match field widths {}",
            header.record_len, expected_record_len
        )));
    }

    Ok(fields)
}

fn decode_value(field: &FieldDescriptor, raw: &[u8]) -> Cell {
    let text = latin1(raw);
    let value = text.trim_matches(|c: char| c == ' ' || c == '\0');

    match field.kind {
        b'L' => match value {
            "T" | "t" | "Y" | "y" => Some("True".to_string()),
            "F" | "f" | "N" | "n" => Some("False".to_string()),
            _ => None,
        },
        _ if value.is_empty() => None,
        _ => Some(value.to_string()),
    }
}

/// Decode a complete DBF file. Deleted records are skipped.
pub fn read_dbf(data: &[u8]) -> Result<Table, DbfError> {
    let header = read_header(data)?;
    let fields = read_fields(data, &header)?;

    let mut table = Table::new(fields.iter().map(|f| f.name.clone()).collect());
    for i in 0..header.record_count {
        let offset = header.header_len + i * header.record_len;
        let record = take(data, offset, header.record_len, "record")?;
        if record[0] != ACTIVE_RECORD {
            continue;
        }

        let mut cursor = 1;
        let row = fields
            .iter()
            .map(|field| {
                let cell = decode_value(field, &record[cursor..cursor + field.length]);
                cursor += field.length;
                cell
            })
            .collect();
        table.push_row(row);
    }

    Ok(table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Build a DBF image with character fields of the given widths.
    pub(crate) fn build_dbf(fields: &[(&str, u8, u8)], records: &[(u8, Vec<&[u8]>)]) -> Vec<u8> {
        let header_len = HEADER_LEN + fields.len() * DESCRIPTOR_LEN + 1;
        let record_len = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();

        let mut out = vec![0u8; HEADER_LEN];
        out[0] = 0x03;
        out[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
        out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
        out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

        for (name, kind, length) in fields {
            let mut descriptor = [0u8; DESCRIPTOR_LEN];
            descriptor[..name.len()].copy_from_slice(name.as_bytes());
            descriptor[11] = *kind;
            descriptor[16] = *length;
            out.extend_from_slice(&descriptor);
        }
        out.push(TERMINATOR);

        for (flag, values) in records {
            out.push(*flag);
            for ((_, _, length), value) in fields.iter().zip(values) {
                let mut cell = vec![b' '; *length as usize];
                cell[..value.len()].copy_from_slice(value);
                out.extend_from_slice(&cell);
            }
        }
        out.push(0x1A);
        out
    }

    fn sample() -> Vec<u8> {
        build_dbf(
            &[("CITY", b'C', 10), ("POP", b'N', 6), ("CAPITAL", b'L', 1)],
            &[
                (b' ', vec![b"Z\xfcrich", b"  4200", b"F"]),
                (b'*', vec![b"Gone", b"     1", b"T"]),
                (b' ', vec![b"Bern", b"", b"T"]),
            ],
        )
    }

    #[test]
    fn test_reads_latin1_and_skips_deleted() {
        let table = read_dbf(&sample()).unwrap();
        assert_eq!(table.columns(), &["CITY", "POP", "CAPITAL"]);
        assert_eq!(table.num_rows(), 2);
        assert_eq!(
            table.rows()[0],
            vec![Some("Zürich".into()), Some("4200".into()), Some("False".into())]
        );
        assert_eq!(table.rows()[1], vec![Some("Bern".into()), None, Some("True".into())]);
    }

    #[test]
    fn test_missing_terminator_is_layout_error() {
        let mut data = sample();
        let terminator_at = HEADER_LEN + 3 * DESCRIPTOR_LEN;
        data[terminator_at] = b'X';
        let err = read_dbf(&data).unwrap_err();
        assert!(matches!(err, DbfError::Layout(_)));
        assert!(matches!(LoadFailure::from(err), LoadFailure::Corrupt(_)));
    }

    #[test]
    fn test_record_length_mismatch_is_layout_error() {
        let mut data = sample();
        data[10..12].copy_from_slice(&99u16.to_le_bytes());
        assert!(matches!(read_dbf(&data).unwrap_err(), DbfError::Layout(_)));
    }

    #[test]
    fn test_truncated_records_are_recoverable() {
        let data = sample();
        let cut = &data[..data.len() - 12];
        let err = read_dbf(cut).unwrap_err();
        assert!(matches!(err, DbfError::Truncated { section: "record", .. }));
        assert!(matches!(LoadFailure::from(err), LoadFailure::Rejected(_)));
    }

    #[test]
    fn test_truncated_header_is_recoverable() {
        let err = read_dbf(&[0x03, 0x7c, 0x01]).unwrap_err();
        assert!(matches!(err, DbfError::Truncated { section: "header", .. }));
    }
}
