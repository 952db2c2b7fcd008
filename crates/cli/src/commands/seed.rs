use serde_json::json;

use crate::commands::{open_store, prepare, CommandResult, StepFailure};
use repairdesk_db::{DemoSeedDataset, SeedResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;

        let outcome: Result<SeedResult, StepFailure> = async {
            let seeded = DemoSeedDataset::load(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = DemoSeedDataset::verify(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

            if verification.all_present {
                Ok(seeded)
            } else {
                Err(("seed_verification", verification_message(&verification.checks), 6u8))
            }
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success_with_data(
            "seed",
            summary(&seeded),
            json!({
                "devices": seeded.devices,
                "technicians": seeded.technicians,
                "pricing_rules": seeded.rules,
            }),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} devices, {} technicians, {} pricing rules",
        seeded.devices.len(),
        seeded.technicians.len(),
        seeded.rules.len()
    )
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
