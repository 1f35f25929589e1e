use serde::Serialize;

use acfr_core::{
    ColumnMapping, EngagementId, ImportId, ImportStatus, LedgerLine, LineId, Money, RawMatrix,
};

use crate::db::DbPool;
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone, Serialize)]
pub struct Engagement {
    pub id: EngagementId,
    pub name: String,
    pub created_at: String,
}

/// One upload/mapping cycle. `raw_matrix` and `column_map` live in the
/// database as JSON and are fetched separately.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRecord {
    pub id: ImportId,
    pub engagement_id: EngagementId,
    pub filename: String,
    pub file_type: String,
    pub status: ImportStatus,
    pub has_headers: bool,
    pub header_rows_to_skip: i64,
    pub row_count: i64,
    pub total_balance: Money,
    pub created_at: String,
}

type ImportRow = (i64, i64, String, String, String, i64, i64, i64, i64, String);

const IMPORT_COLUMNS: &str = "id, engagement_id, filename, file_type, status, has_headers, \
     header_rows_to_skip, row_count, total_balance_cents, created_at";

fn to_record(r: ImportRow) -> StorageResult<ImportRecord> {
    let status = ImportStatus::parse(&r.4)
        .ok_or_else(|| StorageError::corrupt(format!("unknown import status {:?}", r.4)))?;
    Ok(ImportRecord {
        id: ImportId(r.0),
        engagement_id: EngagementId(r.1),
        filename: r.2,
        file_type: r.3,
        status,
        has_headers: r.5 != 0,
        header_rows_to_skip: r.6,
        row_count: r.7,
        total_balance: Money::from_cents(r.8),
        created_at: r.9,
    })
}

pub async fn create_engagement(pool: &DbPool, name: &str) -> StorageResult<EngagementId> {
    let id: i64 = sqlx::query_scalar("INSERT INTO engagements (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(EngagementId(id))
}

pub async fn get_engagement(pool: &DbPool, id: EngagementId) -> StorageResult<Engagement> {
    let row = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, name, created_at FROM engagements WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StorageError::NotFound { entity: "engagement", id: id.0 })?;

    Ok(Engagement {
        id: EngagementId(row.0),
        name: row.1,
        created_at: row.2,
    })
}

/// Captures an upload as a staging import in `NEEDS_MAPPING`. The raw
/// matrix is stored verbatim and never mutated afterwards.
pub async fn create_import(
    pool: &DbPool,
    engagement_id: EngagementId,
    filename: &str,
    file_type: &str,
    has_headers_suggested: bool,
    matrix: &RawMatrix,
) -> StorageResult<ImportId> {
    // FK enforcement is on, but a clear error beats a constraint trip.
    get_engagement(pool, engagement_id).await?;

    let matrix_json = serde_json::to_string(matrix).map_err(StorageError::corrupt)?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO tb_imports (engagement_id, filename, file_type, has_headers, raw_matrix) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(engagement_id.0)
    .bind(filename)
    .bind(file_type)
    .bind(has_headers_suggested as i64)
    .bind(matrix_json)
    .fetch_one(pool)
    .await?;

    tracing::info!(import_id = id, filename, "captured trial balance upload");
    Ok(ImportId(id))
}

pub async fn get_import(pool: &DbPool, id: ImportId) -> StorageResult<ImportRecord> {
    let row = sqlx::query_as::<_, ImportRow>(&format!(
        "SELECT {IMPORT_COLUMNS} FROM tb_imports WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StorageError::NotFound { entity: "import", id: id.0 })?;

    to_record(row)
}

/// Newest import for the engagement regardless of status.
pub async fn latest_import(
    pool: &DbPool,
    engagement_id: EngagementId,
) -> StorageResult<Option<ImportRecord>> {
    let row = sqlx::query_as::<_, ImportRow>(&format!(
        "SELECT {IMPORT_COLUMNS} FROM tb_imports WHERE engagement_id = ? \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(engagement_id.0)
    .fetch_optional(pool)
    .await?;

    row.map(to_record).transpose()
}

/// Newest `IMPORTED` import: the "current" dataset for grouping and
/// statement work. Older imports stay in storage but are not consulted.
pub async fn latest_imported(
    pool: &DbPool,
    engagement_id: EngagementId,
) -> StorageResult<Option<ImportRecord>> {
    let row = sqlx::query_as::<_, ImportRow>(&format!(
        "SELECT {IMPORT_COLUMNS} FROM tb_imports WHERE engagement_id = ? AND status = 'IMPORTED' \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(engagement_id.0)
    .fetch_optional(pool)
    .await?;

    row.map(to_record).transpose()
}

pub async fn get_raw_matrix(pool: &DbPool, id: ImportId) -> StorageResult<RawMatrix> {
    let json: String = sqlx::query_scalar("SELECT raw_matrix FROM tb_imports WHERE id = ?")
        .bind(id.0)
        .fetch_optional(pool)
        .await?
        .ok_or(StorageError::NotFound { entity: "import", id: id.0 })?;

    serde_json::from_str(&json).map_err(StorageError::corrupt)
}

/// Materializes mapped lines for an import, wholesale: prior lines (and
/// through cascade, their assignments) are deleted and recreated in one
/// transaction, and the import transitions to `IMPORTED` with the
/// mapping stored for traceability.
pub async fn replace_import_lines(
    pool: &DbPool,
    import_id: ImportId,
    lines: &[LedgerLine],
    mapping: &ColumnMapping,
    has_headers: bool,
    header_rows_to_skip: i64,
    total_balance: Money,
) -> StorageResult<()> {
    let mapping_json = serde_json::to_string(mapping).map_err(StorageError::corrupt)?;

    let mut tx = pool.begin().await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM tb_imports WHERE id = ?")
        .bind(import_id.0)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(StorageError::NotFound { entity: "import", id: import_id.0 });
    }

    sqlx::query("DELETE FROM assignments WHERE import_id = ?")
        .bind(import_id.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM ledger_lines WHERE import_id = ?")
        .bind(import_id.0)
        .execute(&mut *tx)
        .await?;

    for line in lines {
        sqlx::query(
            "INSERT INTO ledger_lines \
             (import_id, account, description, balance_cents, audit_group, audit_subgroup, fund_code) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(import_id.0)
        .bind(&line.account)
        .bind(&line.description)
        .bind(line.balance.to_cents())
        .bind(&line.audit_group)
        .bind(&line.audit_subgroup)
        .bind(&line.fund_code)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE tb_imports SET status = 'IMPORTED', row_count = ?, total_balance_cents = ?, \
         has_headers = ?, header_rows_to_skip = ?, column_map = ? WHERE id = ?",
    )
    .bind(lines.len() as i64)
    .bind(total_balance.to_cents())
    .bind(has_headers as i64)
    .bind(header_rows_to_skip)
    .bind(mapping_json)
    .bind(import_id.0)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        import_id = import_id.0,
        rows = lines.len(),
        total_cents = total_balance.to_cents(),
        "materialized ledger lines"
    );
    Ok(())
}

/// Every line of an import, for whole-dataset passes such as fund
/// detection.
pub async fn import_lines(pool: &DbPool, import_id: ImportId) -> StorageResult<Vec<LedgerLine>> {
    let rows = sqlx::query_as::<_, LineRow>(&format!(
        "SELECT {LINE_COLUMNS} FROM ledger_lines WHERE import_id = ? ORDER BY account, id"
    ))
    .bind(import_id.0)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(line_from_row).collect())
}

/// Lines of an import ordered by account, capped for preview display.
pub async fn import_preview(
    pool: &DbPool,
    import_id: ImportId,
    limit: i64,
) -> StorageResult<Vec<LedgerLine>> {
    let rows = sqlx::query_as::<_, LineRow>(&format!(
        "SELECT {LINE_COLUMNS} FROM ledger_lines WHERE import_id = ? ORDER BY account LIMIT ?"
    ))
    .bind(import_id.0)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(line_from_row).collect())
}

pub(crate) type LineRow = (
    i64,
    String,
    Option<String>,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
);

pub(crate) const LINE_COLUMNS: &str =
    "id, account, description, balance_cents, audit_group, audit_subgroup, fund_code";

pub(crate) fn line_from_row(r: LineRow) -> LedgerLine {
    LedgerLine {
        id: Some(LineId(r.0)),
        account: r.1,
        description: r.2,
        balance: Money::from_cents(r.3),
        audit_group: r.4,
        audit_subgroup: r.5,
        fund_code: r.6,
    }
}

/// Applies a precomputed fund detection pass atomically: every line's
/// fund code is cleared, detected codes are written back, and each
/// newly seen code upserts its fund row (idempotent, keyed on
/// engagement + code).
pub async fn apply_fund_detection(
    pool: &DbPool,
    engagement_id: EngagementId,
    import_id: ImportId,
    detections: &[(LineId, String)],
) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE ledger_lines SET fund_code = NULL WHERE import_id = ?")
        .bind(import_id.0)
        .execute(&mut *tx)
        .await?;

    for (line_id, fund_code) in detections {
        let updated = sqlx::query(
            "UPDATE ledger_lines SET fund_code = ? WHERE id = ? AND import_id = ?",
        )
        .bind(fund_code)
        .bind(line_id.0)
        .bind(import_id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::ForeignLine {
                line_id: line_id.0,
                import_id: import_id.0,
            });
        }

        sqlx::query(
            "INSERT OR IGNORE INTO funds (engagement_id, fund_code) VALUES (?, ?)",
        )
        .bind(engagement_id.0)
        .bind(fund_code)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        import_id = import_id.0,
        detected = detections.len(),
        "applied fund detection"
    );
    Ok(())
}

/// Removes every import (with lines and assignments) and every fund for
/// the engagement, in one transaction. Fund rules and statement
/// templates survive a clear.
pub async fn clear_engagement_tb(pool: &DbPool, engagement_id: EngagementId) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM assignments WHERE import_id IN \
         (SELECT id FROM tb_imports WHERE engagement_id = ?)",
    )
    .bind(engagement_id.0)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM ledger_lines WHERE import_id IN \
         (SELECT id FROM tb_imports WHERE engagement_id = ?)",
    )
    .bind(engagement_id.0)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM tb_imports WHERE engagement_id = ?")
        .bind(engagement_id.0)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM funds WHERE engagement_id = ?")
        .bind(engagement_id.0)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(engagement_id = engagement_id.0, "cleared trial balance data");
    Ok(())
}
