use serde::{Deserialize, Serialize};

/// One cell of an uploaded trial balance before any mapping.
/// "Blank" is explicit; a whitespace-only text cell also counts as blank.
/// Serializes as `null` / number / string, matching the stored JSON matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Blank,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Blank => true,
            CellValue::Number(_) => false,
            CellValue::Text(s) => s.trim().is_empty(),
        }
    }

    /// Trimmed textual form, or `None` when the cell is blank.
    /// Whole numbers render without a trailing `.0` so account codes
    /// that arrive as spreadsheet numbers survive intact.
    pub fn trimmed(&self) -> Option<String> {
        match self {
            CellValue::Blank => None,
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            CellValue::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            }
        }
    }
}

/// Rectangular-ish matrix of raw cells. Rows may be ragged; missing
/// trailing cells read as blank. Captured once at upload, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawMatrix {
    rows: Vec<Vec<CellValue>>,
}

impl RawMatrix {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        RawMatrix { rows }
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        const BLANK: CellValue = CellValue::Blank;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&BLANK)
    }
}
