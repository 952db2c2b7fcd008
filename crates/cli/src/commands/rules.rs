use serde_json::json;

use crate::commands::{open_store, prepare, CommandResult};
use repairdesk_core::PricingRule;
use repairdesk_db::repositories::SqlPricingRuleRepository;

/// Lists stored pricing rules, newest first. `active_only` hides rules
/// that were deactivated or never switched on.
pub fn run(active_only: bool) -> CommandResult {
    let (config, runtime) = match prepare("rules") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let listed = SqlPricingRuleRepository::new(pool.clone())
            .list_rules()
            .await
            .map_err(|error| ("db_query", error.to_string(), 4u8));
        pool.close().await;
        listed
    });

    let rules = match result {
        Ok(rules) => filter(rules, active_only),
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("rules", error_class, message, exit_code);
        }
    };

    let active = rules.iter().filter(|rule| rule.is_active).count();
    let message = format!("{} pricing rules ({active} active)", rules.len());
    CommandResult::success_with_data("rules", message, json!({ "rules": rules }))
}

fn filter(rules: Vec<PricingRule>, active_only: bool) -> Vec<PricingRule> {
    if active_only {
        rules.into_iter().filter(|rule| rule.is_active).collect()
    } else {
        rules
    }
}
