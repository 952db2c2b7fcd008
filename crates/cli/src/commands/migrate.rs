use crate::commands::{open_store, prepare, CommandResult};
use repairdesk_db::migrations;

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8));
        pool.close().await;
        applied
    });

    match result {
        Ok(versions) => CommandResult::success("migrate", describe(&versions)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

fn describe(versions: &[i64]) -> String {
    match versions.last() {
        Some(latest) => {
            format!("schema up to date at version {latest} ({} migrations applied)", versions.len())
        }
        None => "schema up to date (no migrations recorded)".to_string(),
    }
}
