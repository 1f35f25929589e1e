use rust_decimal::Decimal;
use std::str::FromStr;

use acfr_core::{
    BalanceStrategy, CellValue, ColumnMapping, LedgerLine, MappingError, Money, RawMatrix,
};

/// Result of applying a confirmed column mapping to a raw matrix.
#[derive(Debug, Clone)]
pub struct MappedImport {
    pub lines: Vec<LedgerLine>,
    /// Rows that produced a ledger line (blank and accountless rows are
    /// not counted).
    pub row_count: usize,
    /// Diagnostic only; a trial balance should net to zero but a
    /// nonzero total never blocks the import.
    pub total_balance: Money,
}

/// Parses a monetary cell under the accepted grammar: optional leading
/// `$`, thousands separators, surrounding parentheses for negation,
/// leading `-`. Anything else resolves to zero so one dirty cell cannot abort
/// an otherwise-valid import; the running total surfaces the damage.
pub fn parse_money(raw: &str) -> Money {
    let s = raw.trim();
    if s.is_empty() {
        return Money::zero();
    }

    let (negative, s) = if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        (true, s[1..s.len() - 1].trim())
    } else {
        (false, s)
    };
    // A currency symbol is accepted only in the leading position; a `$`
    // or whitespace between digits is not a number.
    let s = s.strip_prefix('$').map(str::trim_start).unwrap_or(s);
    let cleaned = s.replace(',', "");

    match Decimal::from_str(&cleaned) {
        Ok(d) => {
            let d = if negative { -d } else { d };
            // A magnitude past the i64 cents range is as dirty as any
            // unparseable cell.
            if d.abs() > Decimal::from(i64::MAX / 100) {
                Money::zero()
            } else {
                Money::from_decimal(d)
            }
        }
        Err(_) => Money::zero(),
    }
}

fn money_cell(cell: &CellValue) -> Money {
    match cell.trimmed() {
        Some(text) => parse_money(&text),
        None => Money::zero(),
    }
}

/// Converts a raw matrix into canonical ledger lines.
///
/// Mapping validation happens before any row is touched. Then, after
/// dropping `header_rows_to_skip` rows: all-blank rows are skipped,
/// rows with a blank account cell are skipped, and every surviving row
/// yields exactly one line with a signed balance (final-balance column,
/// or debit minus credit where a parenthesized credit carries its own
/// sign).
pub fn map_rows(
    matrix: &RawMatrix,
    header_rows_to_skip: usize,
    mapping: &ColumnMapping,
) -> Result<MappedImport, MappingError> {
    let strategy = mapping.strategy()?;

    let mut lines = Vec::new();
    for row in matrix.rows().iter().skip(header_rows_to_skip) {
        if row.iter().all(CellValue::is_blank) {
            continue;
        }

        let Some(account) = cell_at(row, mapping.account).trimmed() else {
            continue;
        };

        let balance = match strategy {
            BalanceStrategy::FinalBalance(col) => money_cell(cell_at(row, col)),
            BalanceStrategy::DebitCredit { debit, credit } => {
                money_cell(cell_at(row, debit)) - money_cell(cell_at(row, credit))
            }
        };

        lines.push(LedgerLine {
            id: None,
            account,
            description: optional_text(row, mapping.description),
            balance,
            audit_group: optional_text(row, mapping.group),
            audit_subgroup: optional_text(row, mapping.subgroup),
            fund_code: optional_text(row, mapping.fund),
        });
    }

    let row_count = lines.len();
    let total_balance = Money::sum(lines.iter().map(|l| l.balance));

    Ok(MappedImport {
        lines,
        row_count,
        total_balance,
    })
}

fn cell_at(row: &[CellValue], col: usize) -> &CellValue {
    const BLANK: CellValue = CellValue::Blank;
    row.get(col).unwrap_or(&BLANK)
}

fn optional_text(row: &[CellValue], col: Option<usize>) -> Option<String> {
    col.and_then(|c| cell_at(row, c).trimmed())
}
