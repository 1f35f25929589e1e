use acfr_core::{EngagementId, Fund, FundId, FundRule, FundType, RuleId};

use crate::db::DbPool;
use crate::error::{StorageError, StorageResult};

type FundRow = (i64, String, Option<String>, String, i64);

fn fund_from_row(r: FundRow) -> StorageResult<Fund> {
    let fund_type = FundType::parse(&r.3)
        .ok_or_else(|| StorageError::corrupt(format!("unknown fund type {:?}", r.3)))?;
    Ok(Fund {
        id: FundId(r.0),
        fund_code: r.1,
        name: r.2,
        fund_type,
        is_major: r.4 != 0,
    })
}

/// Idempotent get-or-create keyed on (engagement, fund code). Newly
/// detected funds start as governmental with no display name; repeated
/// detection of the same code is a no-op.
pub async fn ensure_fund(pool: &DbPool, engagement_id: EngagementId, fund_code: &str) -> StorageResult<()> {
    sqlx::query("INSERT OR IGNORE INTO funds (engagement_id, fund_code) VALUES (?, ?)")
        .bind(engagement_id.0)
        .bind(fund_code)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_funds(pool: &DbPool, engagement_id: EngagementId) -> StorageResult<Vec<Fund>> {
    let rows = sqlx::query_as::<_, FundRow>(
        "SELECT id, fund_code, name, fund_type, is_major FROM funds \
         WHERE engagement_id = ? ORDER BY fund_code",
    )
    .bind(engagement_id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(fund_from_row).collect()
}

/// User edits to a detected fund: display name, type, major-fund flag.
pub async fn update_fund(
    pool: &DbPool,
    fund_id: FundId,
    name: Option<&str>,
    fund_type: FundType,
    is_major: bool,
) -> StorageResult<()> {
    let name = name.map(str::trim).filter(|s| !s.is_empty());
    let updated = sqlx::query("UPDATE funds SET name = ?, fund_type = ?, is_major = ? WHERE id = ?")
        .bind(name)
        .bind(fund_type.as_str())
        .bind(is_major as i64)
        .bind(fund_id.0)
        .execute(pool)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(StorageError::NotFound { entity: "fund", id: fund_id.0 });
    }
    Ok(())
}

/// Rules in evaluation order (creation order).
pub async fn list_fund_rules(
    pool: &DbPool,
    engagement_id: EngagementId,
) -> StorageResult<Vec<FundRule>> {
    let rows = sqlx::query_as::<_, (i64, String, String, i64, i64)>(
        "SELECT id, name, pattern, capture_group, enabled FROM fund_rules \
         WHERE engagement_id = ? ORDER BY created_at, id",
    )
    .bind(engagement_id.0)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| FundRule {
            id: Some(RuleId(r.0)),
            name: r.1,
            pattern: r.2,
            capture_group: r.3 as usize,
            enabled: r.4 != 0,
        })
        .collect())
}

/// Stores a rule after compiling its pattern. An uncompilable pattern
/// never reaches the table, so classification can assume every stored
/// rule compiles.
pub async fn create_fund_rule(
    pool: &DbPool,
    engagement_id: EngagementId,
    name: &str,
    pattern: &str,
    capture_group: usize,
) -> StorageResult<RuleId> {
    regex::Regex::new(pattern).map_err(|source| StorageError::InvalidRulePattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO fund_rules (engagement_id, name, pattern, capture_group, enabled) \
         VALUES (?, ?, ?, ?, 1) RETURNING id",
    )
    .bind(engagement_id.0)
    .bind(name)
    .bind(pattern)
    .bind(capture_group as i64)
    .fetch_one(pool)
    .await?;

    tracing::info!(rule_id = id, pattern, "created fund rule");
    Ok(RuleId(id))
}

pub async fn set_rule_enabled(pool: &DbPool, rule_id: RuleId, enabled: bool) -> StorageResult<()> {
    let updated = sqlx::query("UPDATE fund_rules SET enabled = ? WHERE id = ?")
        .bind(enabled as i64)
        .bind(rule_id.0)
        .execute(pool)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(StorageError::NotFound { entity: "fund rule", id: rule_id.0 });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_db_in_memory;
    use crate::imports::create_engagement;

    #[tokio::test]
    async fn ensure_fund_is_idempotent() {
        let pool = create_db_in_memory().await.unwrap();
        let e = create_engagement(&pool, "e").await.unwrap();

        ensure_fund(&pool, e, "10").await.unwrap();
        ensure_fund(&pool, e, "10").await.unwrap();
        ensure_fund(&pool, e, "20").await.unwrap();

        let funds = list_funds(&pool, e).await.unwrap();
        assert_eq!(funds.len(), 2);
        assert_eq!(funds[0].fund_code, "10");
        assert_eq!(funds[0].fund_type, FundType::Governmental);
        assert_eq!(funds[0].name, None);
        assert!(!funds[0].is_major);
    }

    #[tokio::test]
    async fn update_fund_edits_survive_redetection() {
        let pool = create_db_in_memory().await.unwrap();
        let e = create_engagement(&pool, "e").await.unwrap();
        ensure_fund(&pool, e, "10").await.unwrap();
        let fund = &list_funds(&pool, e).await.unwrap()[0];

        update_fund(&pool, fund.id, Some(" General Fund "), FundType::Proprietary, true)
            .await
            .unwrap();
        // Re-detection of an existing code must not reset user edits.
        ensure_fund(&pool, e, "10").await.unwrap();

        let after = &list_funds(&pool, e).await.unwrap()[0];
        assert_eq!(after.name.as_deref(), Some("General Fund"));
        assert_eq!(after.fund_type, FundType::Proprietary);
        assert!(after.is_major);
    }

    #[tokio::test]
    async fn update_missing_fund_is_not_found() {
        let pool = create_db_in_memory().await.unwrap();
        let err = update_fund(&pool, FundId(42), None, FundType::Governmental, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "fund", .. }));
    }

    #[tokio::test]
    async fn create_rule_rejects_uncompilable_pattern() {
        let pool = create_db_in_memory().await.unwrap();
        let e = create_engagement(&pool, "e").await.unwrap();

        let err = create_fund_rule(&pool, e, "broken", "(", 1).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRulePattern { .. }));
        assert!(list_fund_rules(&pool, e).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rules_list_in_creation_order() {
        let pool = create_db_in_memory().await.unwrap();
        let e = create_engagement(&pool, "e").await.unwrap();

        let first = create_fund_rule(&pool, e, "prefix", r"^(\d{2})-", 1).await.unwrap();
        create_fund_rule(&pool, e, "fallback", r"^(\d)", 1).await.unwrap();

        let rules = list_fund_rules(&pool, e).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "prefix");
        assert!(rules[0].enabled);

        set_rule_enabled(&pool, first, false).await.unwrap();
        let rules = list_fund_rules(&pool, e).await.unwrap();
        assert!(!rules[0].enabled);
        assert!(rules[1].enabled);
    }
}
