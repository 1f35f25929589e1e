use std::collections::{HashMap, HashSet};

use serde::Serialize;

use acfr_core::{
    AccountType, EngagementId, Fund, ImportId, LedgerLine, LineId, LineItem, LineItemId, Money,
    StatementKind, TemplateId,
};

use crate::db::DbPool;
use crate::error::{StorageError, StorageResult};
use crate::funds::list_funds;
use crate::imports::line_from_row;

#[derive(Debug, Clone, Serialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub engagement_id: EngagementId,
    pub statement: StatementKind,
    pub name: String,
    pub is_default: bool,
}

/// One row of the statement matrix; `sums` is parallel to the fund
/// column order of the containing matrix.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixRow {
    pub line_item: LineItem,
    pub sums: Vec<Money>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementMatrix {
    pub template_id: TemplateId,
    pub import_id: ImportId,
    pub funds: Vec<Fund>,
    pub rows: Vec<MatrixRow>,
}

/// A fund's ledger line annotated with where it currently sits.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedLine {
    pub line: LedgerLine,
    pub assigned_line_item: Option<LineItemId>,
}

/// Drill-down for one (line item, fund) cell: the lines in the cell,
/// and the rest of the fund's lines with their current home.
#[derive(Debug, Clone, Serialize)]
pub struct CellDetails {
    pub included: Vec<LedgerLine>,
    pub others: Vec<AnnotatedLine>,
}

/// Illustrative starter templates for governmental funds, created once
/// per engagement. Users edit these later; re-running is a no-op.
pub async fn ensure_default_templates(
    pool: &DbPool,
    engagement_id: EngagementId,
) -> StorageResult<()> {
    seed_template(
        pool,
        engagement_id,
        StatementKind::GovernmentalFundsBalanceSheet,
        "Default - Gov Funds Balance Sheet",
        BALANCE_SHEET_ITEMS,
    )
    .await?;
    seed_template(
        pool,
        engagement_id,
        StatementKind::GovernmentalFundsOperating,
        "Default - Gov Funds Revenues/Expenditures/Changes",
        OPERATING_ITEMS,
    )
    .await?;
    Ok(())
}

const BALANCE_SHEET_ITEMS: &[(i64, &str, AccountType)] = &[
    (10, "Cash and investments", AccountType::Asset),
    (20, "Receivables (net)", AccountType::Asset),
    (30, "Due from other funds", AccountType::Asset),
    (40, "Inventories and prepaid items", AccountType::Asset),
    (90, "Total assets", AccountType::Asset),
    (110, "Accounts payable", AccountType::Liability),
    (120, "Accrued liabilities", AccountType::Liability),
    (130, "Due to other funds", AccountType::Liability),
    (190, "Total liabilities", AccountType::Liability),
    (210, "Nonspendable", AccountType::Equity),
    (220, "Restricted", AccountType::Equity),
    (230, "Committed", AccountType::Equity),
    (240, "Assigned", AccountType::Equity),
    (250, "Unassigned", AccountType::Equity),
    (290, "Total fund balances", AccountType::Equity),
    (999, "Total liabilities and fund balances", AccountType::Other),
];

const OPERATING_ITEMS: &[(i64, &str, AccountType)] = &[
    (10, "Taxes", AccountType::Revenue),
    (20, "Intergovernmental", AccountType::Revenue),
    (30, "Charges for services", AccountType::Revenue),
    (40, "Fines and forfeitures", AccountType::Revenue),
    (50, "Investment earnings", AccountType::Revenue),
    (90, "Total revenues", AccountType::Revenue),
    (110, "General government", AccountType::Expense),
    (120, "Public safety", AccountType::Expense),
    (130, "Public works", AccountType::Expense),
    (140, "Culture and recreation", AccountType::Expense),
    (150, "Community development", AccountType::Expense),
    (160, "Debt service - principal", AccountType::Expense),
    (170, "Debt service - interest and fiscal charges", AccountType::Expense),
    (190, "Total expenditures", AccountType::Expense),
    (210, "Excess (deficiency) of revenues over expenditures", AccountType::Other),
    (310, "Transfers in", AccountType::Other),
    (320, "Transfers out", AccountType::Other),
    (330, "Issuance of debt", AccountType::Other),
    (390, "Total other financing sources (uses)", AccountType::Other),
    (410, "Net change in fund balances", AccountType::Other),
    (510, "Fund balances - beginning of year", AccountType::Equity),
    (610, "Fund balances - end of year", AccountType::Equity),
];

async fn seed_template(
    pool: &DbPool,
    engagement_id: EngagementId,
    statement: StatementKind,
    name: &str,
    items: &[(i64, &str, AccountType)],
) -> StorageResult<()> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM statement_templates WHERE engagement_id = ? AND statement = ?",
    )
    .bind(engagement_id.0)
    .bind(statement.as_str())
    .fetch_optional(pool)
    .await?;
    if existing.is_some() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let template_id: i64 = sqlx::query_scalar(
        "INSERT INTO statement_templates (engagement_id, statement, name, is_default) \
         VALUES (?, ?, ?, 1) RETURNING id",
    )
    .bind(engagement_id.0)
    .bind(statement.as_str())
    .bind(name)
    .fetch_one(&mut *tx)
    .await?;

    for &(sort_order, label, account_type) in items {
        sqlx::query(
            "INSERT INTO line_items (template_id, sort_order, label, account_type) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(sort_order)
        .bind(label)
        .bind(account_type.as_str())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(engagement_id = engagement_id.0, statement = statement.as_str(), "seeded template");
    Ok(())
}

pub async fn list_templates(
    pool: &DbPool,
    engagement_id: EngagementId,
) -> StorageResult<Vec<TemplateRecord>> {
    let rows = sqlx::query_as::<_, (i64, i64, String, String, i64)>(
        "SELECT id, engagement_id, statement, name, is_default FROM statement_templates \
         WHERE engagement_id = ? ORDER BY id",
    )
    .bind(engagement_id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(template_from_row).collect()
}

fn template_from_row(r: (i64, i64, String, String, i64)) -> StorageResult<TemplateRecord> {
    let statement = StatementKind::parse(&r.2)
        .ok_or_else(|| StorageError::corrupt(format!("unknown statement kind {:?}", r.2)))?;
    Ok(TemplateRecord {
        id: TemplateId(r.0),
        engagement_id: EngagementId(r.1),
        statement,
        name: r.3,
        is_default: r.4 != 0,
    })
}

async fn get_template(pool: &DbPool, template_id: TemplateId) -> StorageResult<TemplateRecord> {
    let row = sqlx::query_as::<_, (i64, i64, String, String, i64)>(
        "SELECT id, engagement_id, statement, name, is_default FROM statement_templates WHERE id = ?",
    )
    .bind(template_id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StorageError::NotFound { entity: "template", id: template_id.0 })?;

    template_from_row(row)
}

pub async fn line_items(pool: &DbPool, template_id: TemplateId) -> StorageResult<Vec<LineItem>> {
    let rows = sqlx::query_as::<_, (i64, i64, String, String)>(
        "SELECT id, sort_order, label, account_type FROM line_items \
         WHERE template_id = ? ORDER BY sort_order, id",
    )
    .bind(template_id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let account_type = AccountType::parse(&r.3)
                .ok_or_else(|| StorageError::corrupt(format!("unknown account type {:?}", r.3)))?;
            Ok(LineItem {
                id: LineItemId(r.0),
                sort_order: r.1,
                label: r.2,
                account_type,
            })
        })
        .collect()
}

/// Line items × funds, each cell summing the balances of the lines
/// assigned to it within the import.
pub async fn build_matrix(
    pool: &DbPool,
    template_id: TemplateId,
    import_id: ImportId,
) -> StorageResult<StatementMatrix> {
    let template = get_template(pool, template_id).await?;
    let funds = list_funds(pool, template.engagement_id).await?;
    let items = line_items(pool, template_id).await?;

    let sums = sqlx::query_as::<_, (i64, String, i64)>(
        "SELECT a.line_item_id, a.fund_code, COALESCE(SUM(l.balance_cents), 0) \
         FROM assignments a JOIN ledger_lines l ON l.id = a.line_id \
         WHERE a.import_id = ? GROUP BY a.line_item_id, a.fund_code",
    )
    .bind(import_id.0)
    .fetch_all(pool)
    .await?;

    let mut by_cell: HashMap<(i64, String), i64> = HashMap::new();
    for (line_item_id, fund_code, cents) in sums {
        by_cell.insert((line_item_id, fund_code), cents);
    }

    let rows = items
        .into_iter()
        .map(|item| {
            let sums = funds
                .iter()
                .map(|fund| {
                    let cents = by_cell
                        .get(&(item.id.0, fund.fund_code.clone()))
                        .copied()
                        .unwrap_or(0);
                    Money::from_cents(cents)
                })
                .collect();
            MatrixRow { line_item: item, sums }
        })
        .collect();

    Ok(StatementMatrix {
        template_id,
        import_id,
        funds,
        rows,
    })
}

/// Partition of a fund's lines for one cell: "included" are assigned to
/// this line item; "others" are the fund's remaining lines, annotated
/// with whichever line item currently holds each (if any).
pub async fn cell_details(
    pool: &DbPool,
    import_id: ImportId,
    fund_code: &str,
    line_item_id: LineItemId,
) -> StorageResult<CellDetails> {
    require_line_item(pool, line_item_id).await?;

    type AnnotatedRow = (
        i64,
        String,
        Option<String>,
        i64,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<i64>,
    );
    let rows = sqlx::query_as::<_, AnnotatedRow>(
        "SELECT l.id, l.account, l.description, l.balance_cents, \
         l.audit_group, l.audit_subgroup, l.fund_code, a.line_item_id \
         FROM ledger_lines l \
         LEFT JOIN assignments a ON a.line_id = l.id AND a.import_id = l.import_id \
         WHERE l.import_id = ? AND l.fund_code = ? ORDER BY l.account, l.id",
    )
    .bind(import_id.0)
    .bind(fund_code)
    .fetch_all(pool)
    .await?;

    let mut included = Vec::new();
    let mut others = Vec::new();
    for (id, account, description, cents, group, subgroup, fund, assigned) in rows {
        let line = line_from_row((id, account, description, cents, group, subgroup, fund));
        if assigned == Some(line_item_id.0) {
            included.push(line);
        } else {
            others.push(AnnotatedLine {
                line,
                assigned_line_item: assigned.map(LineItemId),
            });
        }
    }

    Ok(CellDetails { included, others })
}

/// Replaces the membership of one (line item, fund) cell with the
/// desired line set, in a single transaction.
///
/// Lines already in the cell are left untouched; lines newly checked
/// are moved in, deleting whatever assignment they held elsewhere in
/// the import; lines no longer desired are unassigned. Saving the same
/// set twice is a no-op.
pub async fn save_cell_assignments(
    pool: &DbPool,
    import_id: ImportId,
    fund_code: &str,
    line_item_id: LineItemId,
    desired: &[LineId],
) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    let item_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM line_items WHERE id = ?")
        .bind(line_item_id.0)
        .fetch_optional(&mut *tx)
        .await?;
    if item_exists.is_none() {
        return Err(StorageError::NotFound { entity: "line item", id: line_item_id.0 });
    }

    // Every desired line must exist in this import and carry this fund
    // code; a dangling reference aborts the save rather than being
    // silently dropped.
    for line_id in desired {
        let found: Option<Option<String>> = sqlx::query_scalar(
            "SELECT fund_code FROM ledger_lines WHERE id = ? AND import_id = ?",
        )
        .bind(line_id.0)
        .bind(import_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        match found {
            None => {
                return Err(StorageError::ForeignLine {
                    line_id: line_id.0,
                    import_id: import_id.0,
                })
            }
            Some(code) if code.as_deref() != Some(fund_code) => {
                return Err(StorageError::WrongFund {
                    line_id: line_id.0,
                    fund_code: fund_code.to_string(),
                })
            }
            Some(_) => {}
        }
    }

    let current: Vec<i64> = sqlx::query_scalar(
        "SELECT line_id FROM assignments \
         WHERE import_id = ? AND line_item_id = ? AND fund_code = ?",
    )
    .bind(import_id.0)
    .bind(line_item_id.0)
    .bind(fund_code)
    .fetch_all(&mut *tx)
    .await?;

    let desired_set: HashSet<i64> = desired.iter().map(|id| id.0).collect();
    let current_set: HashSet<i64> = current.iter().copied().collect();

    for stale in current_set.difference(&desired_set) {
        sqlx::query("DELETE FROM assignments WHERE import_id = ? AND line_id = ?")
            .bind(import_id.0)
            .bind(stale)
            .execute(&mut *tx)
            .await?;
    }

    for incoming in desired_set.difference(&current_set) {
        // The move: whatever cell held this line loses it first.
        sqlx::query("DELETE FROM assignments WHERE import_id = ? AND line_id = ?")
            .bind(import_id.0)
            .bind(incoming)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO assignments (import_id, line_id, line_item_id, fund_code) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(import_id.0)
        .bind(incoming)
        .bind(line_item_id.0)
        .bind(fund_code)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        import_id = import_id.0,
        line_item_id = line_item_id.0,
        fund_code,
        desired = desired.len(),
        "saved cell assignments"
    );
    Ok(())
}

async fn require_line_item(pool: &DbPool, line_item_id: LineItemId) -> StorageResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM line_items WHERE id = ?")
        .bind(line_item_id.0)
        .fetch_optional(pool)
        .await?;
    if found.is_none() {
        return Err(StorageError::NotFound { entity: "line item", id: line_item_id.0 });
    }
    Ok(())
}

/// Lines that carry a fund code but sit in no cell at all. Statement
/// building is gated on this reaching zero.
pub async fn unassigned_count(pool: &DbPool, import_id: ImportId) -> StorageResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ledger_lines l \
         WHERE l.import_id = ? AND l.fund_code IS NOT NULL \
         AND NOT EXISTS (SELECT 1 FROM assignments a \
                         WHERE a.import_id = l.import_id AND a.line_id = l.id)",
    )
    .bind(import_id.0)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_db_in_memory;
    use crate::funds::ensure_fund;
    use crate::imports::{create_engagement, create_import, replace_import_lines};
    use acfr_core::{CellValue, ColumnMapping, RawMatrix};

    struct Fixture {
        pool: DbPool,
        import: ImportId,
        template: TemplateId,
        items: Vec<LineItem>,
        lines: Vec<LedgerLine>,
    }

    async fn fixture() -> Fixture {
        let pool = create_db_in_memory().await.unwrap();
        let e = create_engagement(&pool, "e").await.unwrap();
        let import = create_import(
            &pool,
            e,
            "tb.csv",
            "csv",
            false,
            &RawMatrix::new(vec![vec![CellValue::Blank]]),
        )
        .await
        .unwrap();

        let mk = |account: &str, cents: i64, fund: &str| LedgerLine {
            id: None,
            account: account.to_string(),
            description: None,
            balance: Money::from_cents(cents),
            audit_group: None,
            audit_subgroup: None,
            fund_code: Some(fund.to_string()),
        };
        let mapping = ColumnMapping {
            account: 0,
            description: None,
            final_balance: Some(1),
            debit: None,
            credit: None,
            group: None,
            subgroup: None,
            fund: None,
        };
        replace_import_lines(
            &pool,
            import,
            &[
                mk("10-1000", 50000, "10"),
                mk("10-1100", 25000, "10"),
                mk("10-2000", -75000, "10"),
                mk("20-1000", 30000, "20"),
            ],
            &mapping,
            false,
            0,
            Money::zero(),
        )
        .await
        .unwrap();
        ensure_fund(&pool, e, "10").await.unwrap();
        ensure_fund(&pool, e, "20").await.unwrap();

        ensure_default_templates(&pool, e).await.unwrap();
        let template = list_templates(&pool, e).await.unwrap()[0].id;
        let items = line_items(&pool, template).await.unwrap();
        let lines = crate::imports::import_preview(&pool, import, 50).await.unwrap();

        Fixture { pool, import, template, items, lines }
    }

    fn ids(lines: &[LedgerLine], idx: &[usize]) -> Vec<LineId> {
        idx.iter().map(|i| lines[*i].id.unwrap()).collect()
    }

    #[tokio::test]
    async fn default_templates_seed_once() {
        let f = fixture().await;
        let e = EngagementId(1);
        // Second call is a no-op.
        ensure_default_templates(&f.pool, e).await.unwrap();
        let templates = list_templates(&f.pool, e).await.unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].statement, StatementKind::GovernmentalFundsBalanceSheet);
        assert_eq!(f.items.len(), 16);
        assert_eq!(f.items[0].label, "Cash and investments");
    }

    #[tokio::test]
    async fn save_and_build_matrix_sums_cells() {
        let f = fixture().await;
        let cash = f.items[0].id;

        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 1]))
            .await
            .unwrap();

        let matrix = build_matrix(&f.pool, f.template, f.import).await.unwrap();
        assert_eq!(matrix.funds.len(), 2);
        let row = &matrix.rows[0];
        assert_eq!(row.line_item.id, cash);
        assert_eq!(row.sums[0].to_cents(), 75000); // fund "10"
        assert_eq!(row.sums[1].to_cents(), 0); // fund "20"
    }

    #[tokio::test]
    async fn cell_sum_equals_included_lines() {
        let f = fixture().await;
        let cash = f.items[0].id;
        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 2]))
            .await
            .unwrap();

        let details = cell_details(&f.pool, f.import, "10", cash).await.unwrap();
        let included_total = Money::sum(details.included.iter().map(|l| l.balance));

        let matrix = build_matrix(&f.pool, f.template, f.import).await.unwrap();
        let fund_idx = matrix.funds.iter().position(|x| x.fund_code == "10").unwrap();
        assert_eq!(matrix.rows[0].sums[fund_idx], included_total);
        assert_eq!(included_total.to_cents(), 50000 - 75000);
    }

    #[tokio::test]
    async fn moving_a_line_removes_its_old_assignment() {
        let f = fixture().await;
        let cash = f.items[0].id;
        let receivables = f.items[1].id;

        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 1]))
            .await
            .unwrap();
        // Pull line 1 into the receivables cell.
        save_cell_assignments(&f.pool, f.import, "10", receivables, &ids(&f.lines, &[1]))
            .await
            .unwrap();

        let cash_cell = cell_details(&f.pool, f.import, "10", cash).await.unwrap();
        assert_eq!(cash_cell.included.len(), 1);
        assert_eq!(cash_cell.included[0].id, f.lines[0].id);

        let recv_cell = cell_details(&f.pool, f.import, "10", receivables).await.unwrap();
        assert_eq!(recv_cell.included.len(), 1);
        // The moved line shows up annotated in the cash cell's "others".
        let moved = cash_cell
            .others
            .iter()
            .find(|o| o.line.id == f.lines[1].id)
            .unwrap();
        assert_eq!(moved.assigned_line_item, Some(receivables));
    }

    #[tokio::test]
    async fn unchecking_removes_a_line_from_the_cell() {
        let f = fixture().await;
        let cash = f.items[0].id;

        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 1]))
            .await
            .unwrap();
        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0]))
            .await
            .unwrap();

        let details = cell_details(&f.pool, f.import, "10", cash).await.unwrap();
        assert_eq!(details.included.len(), 1);
        let dropped = details
            .others
            .iter()
            .find(|o| o.line.id == f.lines[1].id)
            .unwrap();
        assert_eq!(dropped.assigned_line_item, None);
    }

    #[tokio::test]
    async fn resave_with_unchanged_set_is_idempotent() {
        let f = fixture().await;
        let cash = f.items[0].id;
        let desired = ids(&f.lines, &[0, 1]);

        save_cell_assignments(&f.pool, f.import, "10", cash, &desired).await.unwrap();
        let before: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, line_id FROM assignments ORDER BY id")
                .fetch_all(&f.pool)
                .await
                .unwrap();

        save_cell_assignments(&f.pool, f.import, "10", cash, &desired).await.unwrap();
        let after: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, line_id FROM assignments ORDER BY id")
                .fetch_all(&f.pool)
                .await
                .unwrap();

        // No delete-then-recreate churn: the row ids are untouched.
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn desired_lines_end_up_in_exactly_one_cell() {
        let f = fixture().await;
        let cash = f.items[0].id;
        let receivables = f.items[1].id;

        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 1, 2]))
            .await
            .unwrap();
        save_cell_assignments(&f.pool, f.import, "10", receivables, &ids(&f.lines, &[1, 2]))
            .await
            .unwrap();

        let counts: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT line_id, COUNT(*) FROM assignments GROUP BY line_id",
        )
        .fetch_all(&f.pool)
        .await
        .unwrap();
        assert!(counts.iter().all(|(_, n)| *n == 1));
        assert_eq!(counts.len(), 3);
    }

    #[tokio::test]
    async fn dangling_references_abort_the_save() {
        let f = fixture().await;
        let cash = f.items[0].id;

        let err = save_cell_assignments(&f.pool, f.import, "10", cash, &[LineId(404_404)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ForeignLine { .. }));

        let err = save_cell_assignments(&f.pool, f.import, "10", LineItemId(404_404), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "line item", .. }));

        // A line from the wrong fund is rejected, and the valid part of
        // the set is not applied.
        let err = save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WrongFund { .. }));
        let details = cell_details(&f.pool, f.import, "10", cash).await.unwrap();
        assert!(details.included.is_empty());
    }

    #[tokio::test]
    async fn unassigned_count_gates_statement_building() {
        let f = fixture().await;
        assert_eq!(unassigned_count(&f.pool, f.import).await.unwrap(), 4);

        let cash = f.items[0].id;
        save_cell_assignments(&f.pool, f.import, "10", cash, &ids(&f.lines, &[0, 1]))
            .await
            .unwrap();
        assert_eq!(unassigned_count(&f.pool, f.import).await.unwrap(), 2);
    }
}
