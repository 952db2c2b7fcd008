use tracing::info;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_DEVICE_IDS: &[&str] =
    &["iphone-13", "iphone-15-pro", "galaxy-s23", "pixel-8", "ipad-air-5", "macbook-air-m2"];
const SEED_TECHNICIAN_IDS: &[&str] = &["tech-alice", "tech-bilal", "tech-chen"];
const SEED_AVAILABLE_TECHNICIANS: i64 = 2;
const SEED_RULE_IDS: &[&str] = &[
    "rule-generic-screen",
    "rule-iphone13-screen",
    "rule-generic-battery",
    "rule-galaxy-water",
    "rule-generic-charging-archived",
];
const SEED_ACTIVE_RULES: i64 = 4;

/// Demo devices, technicians and pricing rules for local runs and
/// end-to-end tests.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the demo dataset. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        let result = SeedResult {
            devices: SEED_DEVICE_IDS.to_vec(),
            technicians: SEED_TECHNICIAN_IDS.to_vec(),
            rules: SEED_RULE_IDS.to_vec(),
        };
        info!(
            event_name = "db.seed_loaded",
            devices = result.devices.len(),
            technicians = result.technicians.len(),
            rules = result.rules.len(),
            "demo seed loaded"
        );
        Ok(result)
    }

    /// Checks that every seeded row is present with its expected state.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let devices: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM device_model WHERE id IN {}",
            sql_array_from_ids(SEED_DEVICE_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("devices", devices == SEED_DEVICE_IDS.len() as i64));

        let technicians: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM technician WHERE id IN {}",
            sql_array_from_ids(SEED_TECHNICIAN_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("technicians", technicians == SEED_TECHNICIAN_IDS.len() as i64));

        let available: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM technician WHERE is_available = 1 AND id IN {}",
            sql_array_from_ids(SEED_TECHNICIAN_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("available-technicians", available == SEED_AVAILABLE_TECHNICIANS));

        let rules: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM pricing_rule WHERE id IN {}",
            sql_array_from_ids(SEED_RULE_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("pricing-rules", rules == SEED_RULE_IDS.len() as i64));

        let active: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM pricing_rule WHERE is_active = 1 AND id IN {}",
            sql_array_from_ids(SEED_RULE_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("active-pricing-rules", active == SEED_ACTIVE_RULES));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded rows, including bookings made against seeded devices.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let devices = sql_array_from_ids(SEED_DEVICE_IDS);
        sqlx::query(&format!("DELETE FROM booking WHERE device_model_id IN {devices}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM pricing_rule WHERE id IN {}",
            sql_array_from_ids(SEED_RULE_IDS)
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "DELETE FROM technician WHERE id IN {}",
            sql_array_from_ids(SEED_TECHNICIAN_IDS)
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM device_model WHERE id IN {devices}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub devices: Vec<&'static str>,
    pub technicians: Vec<&'static str>,
    pub rules: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
