use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use repairdesk_core::domain::booking::RepairType;
use repairdesk_core::domain::device::DeviceModelId;
use repairdesk_core::domain::pricing_rule::{PricingFactors, PricingRule, RuleId, RuleScope};
use repairdesk_core::money::Money;

use super::{
    backend_error, decode_enum, decode_factor, decode_optional_timestamp, decode_timestamp,
    decode_version, encode_factor, encode_timestamp, is_unique_violation, PricingRuleRepository,
    RepositoryError, StorageError,
};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, device_model_id, repair_type, base_price_minor,
    urgency_multiplier, complexity_multiplier, market_demand, seasonal_factor,
    valid_from, valid_until, is_active, version, created_at, updated_at";

/// Pricing rules backed by the `pricing_rule` table.
///
/// A partial unique index over `(device_model_id, repair_type)` admits one
/// active rule per scope; violations surface as
/// [`StorageError::ActiveScopeConflict`].
pub struct SqlPricingRuleRepository {
    pool: DbPool,
}

impl SqlPricingRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Every stored rule, newest first, for the `rules` operator command.
    pub async fn list_rules(&self) -> Result<Vec<PricingRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM pricing_rule ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }
}

#[async_trait::async_trait]
impl PricingRuleRepository for SqlPricingRuleRepository {
    async fn find_rule(&self, id: &RuleId) -> Result<Option<PricingRule>, StorageError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM pricing_rule WHERE id = ?1"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(row.as_ref().map(rule_from_row).transpose()?)
    }

    async fn find_active_rules(
        &self,
        scope: &RuleScope,
        repair_type: RepairType,
        at: DateTime<Utc>,
    ) -> Result<Vec<PricingRule>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM pricing_rule
             WHERE repair_type = ?1 AND device_model_id IS ?2 AND is_active = 1
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(repair_type.as_str())
        .bind(scope.device_model_id().map(|id| id.0.clone()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            let rule = rule_from_row(row)?;
            if rule.is_applicable_at(at) {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    async fn insert_rule(&self, rule: &PricingRule) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pricing_rule WHERE id = ?1)")
                .bind(&rule.id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(backend_error)?;
        if exists {
            return Err(StorageError::Duplicate { entity: "pricing_rule", id: rule.id.0.clone() });
        }

        sqlx::query(
            "INSERT INTO pricing_rule (
                id, device_model_id, repair_type, base_price_minor,
                urgency_multiplier, complexity_multiplier, market_demand, seasonal_factor,
                valid_from, valid_until, is_active, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&rule.id.0)
        .bind(rule.scope.device_model_id().map(|id| id.0.clone()))
        .bind(rule.repair_type.as_str())
        .bind(rule.base_price.minor_units())
        .bind(encode_factor(rule.factors.urgency_multiplier))
        .bind(encode_factor(rule.factors.complexity_multiplier))
        .bind(encode_factor(rule.factors.market_demand))
        .bind(encode_factor(rule.factors.seasonal_factor))
        .bind(rule.valid_from.map(encode_timestamp))
        .bind(rule.valid_until.map(encode_timestamp))
        .bind(rule.is_active)
        .bind(i64::from(rule.version))
        .bind(encode_timestamp(rule.created_at))
        .bind(encode_timestamp(rule.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| scope_conflict_or_backend(error, rule))?;

        tx.commit().await.map_err(backend_error)?;
        debug!(
            event_name = "db.pricing_rule_inserted",
            rule_id = %rule.id,
            "pricing rule inserted"
        );
        Ok(())
    }

    async fn save_rule(
        &self,
        rule: &PricingRule,
        expected_version: u32,
    ) -> Result<u32, StorageError> {
        let next_version = expected_version + 1;
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let updated = sqlx::query(
            "UPDATE pricing_rule SET
                device_model_id = ?1,
                repair_type = ?2,
                base_price_minor = ?3,
                urgency_multiplier = ?4,
                complexity_multiplier = ?5,
                market_demand = ?6,
                seasonal_factor = ?7,
                valid_from = ?8,
                valid_until = ?9,
                is_active = ?10,
                updated_at = ?11,
                version = ?12
             WHERE id = ?13 AND version = ?14",
        )
        .bind(rule.scope.device_model_id().map(|id| id.0.clone()))
        .bind(rule.repair_type.as_str())
        .bind(rule.base_price.minor_units())
        .bind(encode_factor(rule.factors.urgency_multiplier))
        .bind(encode_factor(rule.factors.complexity_multiplier))
        .bind(encode_factor(rule.factors.market_demand))
        .bind(encode_factor(rule.factors.seasonal_factor))
        .bind(rule.valid_from.map(encode_timestamp))
        .bind(rule.valid_until.map(encode_timestamp))
        .bind(rule.is_active)
        .bind(encode_timestamp(rule.updated_at))
        .bind(i64::from(next_version))
        .bind(&rule.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await
        .map_err(|error| scope_conflict_or_backend(error, rule))?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM pricing_rule WHERE id = ?1")
                    .bind(&rule.id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend_error)?;
            return Err(match actual {
                None => StorageError::Missing { entity: "pricing_rule", id: rule.id.0.clone() },
                Some(actual) => StorageError::VersionConflict {
                    entity: "pricing_rule",
                    id: rule.id.0.clone(),
                    expected: expected_version,
                    actual: decode_version(actual)?,
                },
            });
        }

        tx.commit().await.map_err(backend_error)?;
        debug!(
            event_name = "db.pricing_rule_saved",
            rule_id = %rule.id,
            version = next_version,
            is_active = rule.is_active,
            "pricing rule saved"
        );
        Ok(next_version)
    }
}

fn scope_conflict_or_backend(error: sqlx::Error, rule: &PricingRule) -> StorageError {
    if is_unique_violation(&error) {
        return StorageError::ActiveScopeConflict {
            scope: rule.scope.clone(),
            repair_type: rule.repair_type,
        };
    }
    backend_error(error)
}

fn rule_from_row(row: &SqliteRow) -> Result<PricingRule, RepositoryError> {
    let repair_type: String = row.try_get("repair_type")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let device_model_id: Option<String> = row.try_get("device_model_id")?;

    Ok(PricingRule {
        id: RuleId(row.try_get("id")?),
        scope: RuleScope::from_device(device_model_id.map(DeviceModelId)),
        repair_type: decode_enum("repair_type", &repair_type, RepairType::parse)?,
        base_price: Money::from_minor(row.try_get("base_price_minor")?),
        factors: PricingFactors {
            urgency_multiplier: decode_factor(
                "urgency_multiplier",
                row.try_get("urgency_multiplier")?,
            )?,
            complexity_multiplier: decode_factor(
                "complexity_multiplier",
                row.try_get("complexity_multiplier")?,
            )?,
            market_demand: decode_factor("market_demand", row.try_get("market_demand")?)?,
            seasonal_factor: decode_factor("seasonal_factor", row.try_get("seasonal_factor")?)?,
        },
        valid_from: decode_optional_timestamp("valid_from", row.try_get("valid_from")?)?,
        valid_until: decode_optional_timestamp("valid_until", row.try_get("valid_until")?)?,
        is_active: row.try_get("is_active")?,
        version: decode_version(row.try_get("version")?)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use repairdesk_core::domain::booking::RepairType;
    use repairdesk_core::domain::device::{DeviceCategory, DeviceModel, DeviceModelId};
    use repairdesk_core::domain::pricing_rule::{
        PricingFactors, PricingRule, RuleDraft, RuleId, RuleScope,
    };
    use repairdesk_core::money::{Factor, Money};

    use super::SqlPricingRuleRepository;
    use crate::repositories::{PricingRuleRepository, SqlDeviceCatalog, StorageError};
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlPricingRuleRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        SqlDeviceCatalog::new(pool.clone())
            .register(&DeviceModel {
                id: DeviceModelId("pixel-8".to_string()),
                brand: "Google".to_string(),
                name: "Pixel 8".to_string(),
                category: DeviceCategory::Smartphone,
            })
            .await
            .expect("register device");
        SqlPricingRuleRepository::new(pool)
    }

    fn rule(id: &str, scope: RuleScope, is_active: bool) -> PricingRule {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        PricingRule::from_draft(
            RuleId(id.to_string()),
            RuleDraft {
                scope,
                repair_type: RepairType::ScreenRepair,
                base_price: Money::from_major(180),
                factors: PricingFactors {
                    urgency_multiplier: Some(Factor::from_parts(15, 1)),
                    market_demand: Some(Factor::from_parts(105, 2)),
                    ..PricingFactors::default()
                },
                valid_from: Some(now),
                valid_until: Some(now + Duration::days(30)),
                is_active,
            },
            now,
        )
    }

    fn pixel() -> RuleScope {
        RuleScope::Specific(DeviceModelId("pixel-8".to_string()))
    }

    #[tokio::test]
    async fn rules_round_trip_with_factors() {
        let repo = repository().await;
        let stored = rule("PR-1", pixel(), true);

        repo.insert_rule(&stored).await.expect("insert");

        assert_eq!(repo.find_rule(&stored.id).await.expect("find"), Some(stored));
    }

    #[tokio::test]
    async fn active_lookup_honours_scope_and_window() {
        let repo = repository().await;
        let specific = rule("PR-1", pixel(), true);
        let generic = rule("PR-2", RuleScope::Generic, true);
        repo.insert_rule(&specific).await.expect("insert specific");
        repo.insert_rule(&generic).await.expect("insert generic");

        let inside = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 4, 10, 0, 0, 0).unwrap();

        let found = repo
            .find_active_rules(&pixel(), RepairType::ScreenRepair, inside)
            .await
            .expect("find specific");
        assert_eq!(found, vec![specific]);

        let found = repo
            .find_active_rules(&RuleScope::Generic, RepairType::ScreenRepair, inside)
            .await
            .expect("find generic");
        assert_eq!(found, vec![generic]);

        let expired = repo
            .find_active_rules(&pixel(), RepairType::ScreenRepair, after)
            .await
            .expect("find expired");
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn second_active_rule_in_scope_is_rejected() {
        let repo = repository().await;
        repo.insert_rule(&rule("PR-1", pixel(), true)).await.expect("insert first");
        repo.insert_rule(&rule("PR-2", pixel(), false)).await.expect("inactive twin is fine");

        let error = repo.insert_rule(&rule("PR-3", pixel(), true)).await.expect_err("conflict");
        assert!(matches!(error, StorageError::ActiveScopeConflict { .. }));

        let mut twin = repo
            .find_rule(&RuleId("PR-2".to_string()))
            .await
            .expect("find")
            .expect("stored");
        twin.is_active = true;
        let error = repo.save_rule(&twin, 1).await.expect_err("activation conflict");
        assert!(matches!(error, StorageError::ActiveScopeConflict { .. }));
    }

    #[tokio::test]
    async fn duplicate_ids_and_stale_versions_are_reported() {
        let repo = repository().await;
        let mut stored = rule("PR-1", pixel(), true);
        repo.insert_rule(&stored).await.expect("insert");

        let error = repo.insert_rule(&stored).await.expect_err("duplicate id");
        assert!(matches!(error, StorageError::Duplicate { entity: "pricing_rule", .. }));

        stored.is_active = false;
        assert_eq!(repo.save_rule(&stored, 1).await.expect("deactivate"), 2);
        let error = repo.save_rule(&stored, 1).await.expect_err("stale");
        assert!(matches!(error, StorageError::VersionConflict { expected: 1, actual: 2, .. }));

        let listed = repo.list_rules().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_active);
        assert_eq!(listed[0].version, 2);
    }
}
