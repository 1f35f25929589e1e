use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use thiserror::Error;

use acfr_core::{CellValue, RawMatrix};

/// Upload format, derived from the filename extension before any
/// parsing is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Result<Self, FormatError> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".csv") {
            Ok(FileKind::Csv)
        } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            Ok(FileKind::Spreadsheet)
        } else {
            Err(FormatError::UnsupportedExtension(filename.to_string()))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Spreadsheet => "excel",
        }
    }
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported file type: {0} (upload .csv, .xlsx, or .xls)")]
    UnsupportedExtension(String),
    #[error("file appears empty")]
    Empty,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
}

/// Decodes raw upload bytes into an untyped cell matrix. No column
/// semantics are applied here; headers are just rows.
pub fn read_matrix(bytes: &[u8], kind: FileKind) -> Result<RawMatrix, FormatError> {
    let matrix = match kind {
        FileKind::Csv => read_csv(bytes)?,
        FileKind::Spreadsheet => read_spreadsheet(bytes)?,
    };

    if matrix.is_empty() {
        return Err(FormatError::Empty);
    }
    Ok(matrix)
}

fn read_csv(bytes: &[u8]) -> Result<RawMatrix, FormatError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let cells = record
            .iter()
            .enumerate()
            .map(|(col_idx, field)| {
                // Ledger exports frequently carry a UTF-8 BOM on the
                // first cell.
                let field = if row_idx == 0 && col_idx == 0 {
                    field.trim_start_matches('\u{feff}')
                } else {
                    field
                };
                if field.is_empty() {
                    CellValue::Blank
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        rows.push(cells);
    }

    Ok(RawMatrix::new(rows))
}

fn read_spreadsheet(bytes: &[u8]) -> Result<RawMatrix, FormatError> {
    let cursor = Cursor::new(bytes);
    let mut workbook = open_workbook_auto_from_rs(cursor)?;

    let Some(range) = workbook.worksheet_range_at(0) else {
        return Err(FormatError::Empty);
    };
    let range = range?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(convert_cell).collect())
        .collect();

    Ok(RawMatrix::new(rows))
}

fn convert_cell(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Blank,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}
