use serde::{Deserialize, Serialize};

use acfr_core::{ImportId, LedgerLine, LineId};

use crate::db::DbPool;
use crate::error::{StorageError, StorageResult};
use crate::imports::{line_from_row, LineRow, LINE_COLUMNS};

const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct LinePage {
    pub lines: Vec<LedgerLine>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupingStats {
    pub total: i64,
    pub grouped: i64,
    pub ungrouped: i64,
}

/// One grouping edit as submitted; values are trimmed and blank strings
/// normalize to unset before persisting.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupingEdit {
    pub line_id: LineId,
    pub audit_group: String,
    pub audit_subgroup: String,
}

fn normalized(value: &str) -> Option<String> {
    let t = value.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

// Search and the ungrouped filter live in SQL so the page and its total
// stay consistent. SQLite's lower() folds ASCII only, so the needle is
// ASCII-folded to match: case-insensitivity holds for ASCII text, and
// non-ASCII characters compare exactly. "Ungrouped" is canonically
// "audit_group is unset"; the subgroup does not participate (see
// DESIGN.md).
const LIST_FILTER: &str = "import_id = ?1 \
     AND (?2 IS NULL \
          OR instr(lower(account), ?2) > 0 \
          OR instr(lower(COALESCE(description, '')), ?2) > 0 \
          OR instr(lower(COALESCE(audit_group, '')), ?2) > 0 \
          OR instr(lower(COALESCE(audit_subgroup, '')), ?2) > 0 \
          OR instr(lower(COALESCE(fund_code, '')), ?2) > 0) \
     AND (?3 = 0 OR audit_group IS NULL)";

/// Paginated, optionally filtered listing of an import's lines, ordered
/// by account. `page` is 1-based.
pub async fn list_ledger_lines(
    pool: &DbPool,
    import_id: ImportId,
    page: i64,
    page_size: i64,
    search: Option<&str>,
    ungrouped_only: bool,
) -> StorageResult<LinePage> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let needle = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase);

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM ledger_lines WHERE {LIST_FILTER}"
    ))
    .bind(import_id.0)
    .bind(&needle)
    .bind(ungrouped_only as i64)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query_as::<_, LineRow>(&format!(
        "SELECT {LINE_COLUMNS} FROM ledger_lines WHERE {LIST_FILTER} \
         ORDER BY account, id LIMIT ?4 OFFSET ?5"
    ))
    .bind(import_id.0)
    .bind(&needle)
    .bind(ungrouped_only as i64)
    .bind(page_size)
    .bind((page - 1) * page_size)
    .fetch_all(pool)
    .await?;

    Ok(LinePage {
        lines: rows.into_iter().map(line_from_row).collect(),
        total,
        page,
        page_size,
    })
}

/// Applies a batch of grouping edits, all or nothing. Any edit naming a
/// line outside this import aborts the whole batch before commit.
pub async fn bulk_update_groupings(
    pool: &DbPool,
    import_id: ImportId,
    edits: &[GroupingEdit],
) -> StorageResult<()> {
    let mut tx = pool.begin().await?;

    for edit in edits {
        let updated = sqlx::query(
            "UPDATE ledger_lines SET audit_group = ?, audit_subgroup = ? \
             WHERE id = ? AND import_id = ?",
        )
        .bind(normalized(&edit.audit_group))
        .bind(normalized(&edit.audit_subgroup))
        .bind(edit.line_id.0)
        .bind(import_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::ForeignLine {
                line_id: edit.line_id.0,
                import_id: import_id.0,
            });
        }
    }

    tx.commit().await?;

    tracing::info!(import_id = import_id.0, edits = edits.len(), "applied grouping edits");
    Ok(())
}

pub async fn grouping_stats(pool: &DbPool, import_id: ImportId) -> StorageResult<GroupingStats> {
    let (total, ungrouped): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN audit_group IS NULL THEN 1 ELSE 0 END), 0) \
         FROM ledger_lines WHERE import_id = ?",
    )
    .bind(import_id.0)
    .fetch_one(pool)
    .await?;

    Ok(GroupingStats {
        total,
        grouped: total - ungrouped,
        ungrouped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_db_in_memory;
    use crate::imports::{create_engagement, create_import, replace_import_lines};
    use acfr_core::{CellValue, ColumnMapping, EngagementId, LedgerLine, Money, RawMatrix};

    async fn seed(pool: &DbPool) -> ImportId {
        let e: EngagementId = create_engagement(pool, "e").await.unwrap();
        let import = create_import(
            pool,
            e,
            "tb.csv",
            "csv",
            false,
            &RawMatrix::new(vec![vec![CellValue::Blank]]),
        )
        .await
        .unwrap();

        let mk = |account: &str, group: Option<&str>, sub: Option<&str>, fund: Option<&str>| LedgerLine {
            id: None,
            account: account.to_string(),
            description: Some(format!("{account} description")),
            balance: Money::from_cents(100),
            audit_group: group.map(str::to_string),
            audit_subgroup: sub.map(str::to_string),
            fund_code: fund.map(str::to_string),
        };
        let lines = vec![
            mk("10-1000", Some("Assets"), Some("Cash"), Some("10")),
            mk("10-2000", Some("Assets"), None, Some("10")),
            mk("20-1000", None, Some("Orphan"), Some("20")),
            mk("20-2000", None, None, None),
        ];
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
        replace_import_lines(pool, import, &lines, &mapping, false, 0, Money::zero())
            .await
            .unwrap();
        import
    }

    #[tokio::test]
    async fn pagination_and_total() {
        let pool = create_db_in_memory().await.unwrap();
        let import = seed(&pool).await;

        let page1 = list_ledger_lines(&pool, import, 1, 3, None, false).await.unwrap();
        assert_eq!(page1.total, 4);
        assert_eq!(page1.lines.len(), 3);
        assert_eq!(page1.lines[0].account, "10-1000");

        let page2 = list_ledger_lines(&pool, import, 2, 3, None, false).await.unwrap();
        assert_eq!(page2.lines.len(), 1);
        assert_eq!(page2.lines[0].account, "20-2000");
    }

    #[tokio::test]
    async fn search_is_case_insensitive_across_fields() {
        let pool = create_db_in_memory().await.unwrap();
        let import = seed(&pool).await;

        let by_account = list_ledger_lines(&pool, import, 1, 50, Some("10-2"), false)
            .await
            .unwrap();
        assert_eq!(by_account.total, 1);

        let by_group = list_ledger_lines(&pool, import, 1, 50, Some("ASSETS"), false)
            .await
            .unwrap();
        assert_eq!(by_group.total, 2);

        let by_subgroup = list_ledger_lines(&pool, import, 1, 50, Some("orphan"), false)
            .await
            .unwrap();
        assert_eq!(by_subgroup.total, 1);

        let by_fund = list_ledger_lines(&pool, import, 1, 50, Some("20"), false)
            .await
            .unwrap();
        // Matches accounts "20-1000"/"20-2000" and fund code "20".
        assert_eq!(by_fund.total, 2);
    }

    #[tokio::test]
    async fn search_folds_ascii_next_to_non_ascii() {
        let pool = create_db_in_memory().await.unwrap();
        let import = seed(&pool).await;
        let lines = list_ledger_lines(&pool, import, 1, 50, None, false).await.unwrap().lines;

        bulk_update_groupings(
            &pool,
            import,
            &[GroupingEdit {
                line_id: lines[0].id.unwrap(),
                audit_group: "Général".into(),
                audit_subgroup: String::new(),
            }],
        )
        .await
        .unwrap();

        // ASCII letters fold on both sides; the accented character has
        // to match exactly.
        let hit = list_ledger_lines(&pool, import, 1, 50, Some("généRAL"), false)
            .await
            .unwrap();
        assert_eq!(hit.total, 1);
        let miss = list_ledger_lines(&pool, import, 1, 50, Some("GÉNÉRAL"), false)
            .await
            .unwrap();
        assert_eq!(miss.total, 0);
    }

    #[tokio::test]
    async fn ungrouped_filter_considers_group_only() {
        let pool = create_db_in_memory().await.unwrap();
        let import = seed(&pool).await;

        let ungrouped = list_ledger_lines(&pool, import, 1, 50, None, true).await.unwrap();
        let accounts: Vec<_> = ungrouped.lines.iter().map(|l| l.account.as_str()).collect();
        // 20-1000 has a subgroup but no group; it still counts as ungrouped.
        assert_eq!(accounts, vec!["20-1000", "20-2000"]);

        let stats = grouping_stats(&pool, import).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.grouped, 2);
        assert_eq!(stats.ungrouped, 2);
    }

    #[tokio::test]
    async fn bulk_update_trims_and_normalizes_blanks() {
        let pool = create_db_in_memory().await.unwrap();
        let import = seed(&pool).await;
        let lines = list_ledger_lines(&pool, import, 1, 50, None, false).await.unwrap().lines;

        let edits = vec![
            GroupingEdit {
                line_id: lines[0].id.unwrap(),
                audit_group: "  Liabilities  ".into(),
                audit_subgroup: "   ".into(),
            },
            GroupingEdit {
                line_id: lines[3].id.unwrap(),
                audit_group: "Equity".into(),
                audit_subgroup: "Restricted".into(),
            },
        ];
        bulk_update_groupings(&pool, import, &edits).await.unwrap();

        let after = list_ledger_lines(&pool, import, 1, 50, None, false).await.unwrap().lines;
        assert_eq!(after[0].audit_group.as_deref(), Some("Liabilities"));
        assert_eq!(after[0].audit_subgroup, None);
        assert_eq!(after[3].audit_group.as_deref(), Some("Equity"));
    }

    #[tokio::test]
    async fn bulk_update_is_all_or_nothing() {
        let pool = create_db_in_memory().await.unwrap();
        let import = seed(&pool).await;
        let lines = list_ledger_lines(&pool, import, 1, 50, None, false).await.unwrap().lines;

        let mut edits: Vec<GroupingEdit> = lines
            .iter()
            .map(|l| GroupingEdit {
                line_id: l.id.unwrap(),
                audit_group: "Changed".into(),
                audit_subgroup: String::new(),
            })
            .collect();
        edits.push(GroupingEdit {
            line_id: LineId(999_999),
            audit_group: "Changed".into(),
            audit_subgroup: String::new(),
        });

        let err = bulk_update_groupings(&pool, import, &edits).await.unwrap_err();
        assert!(matches!(err, StorageError::ForeignLine { .. }));

        // None of the valid edits may have stuck.
        let after = list_ledger_lines(&pool, import, 1, 50, None, false).await.unwrap().lines;
        assert!(after.iter().all(|l| l.audit_group.as_deref() != Some("Changed")));
    }
}
