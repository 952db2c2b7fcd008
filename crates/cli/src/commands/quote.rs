use std::sync::Arc;

use chrono::Utc;

use crate::commands::{open_store, prepare, CommandResult, StepFailure};
use repairdesk_core::{
    ApplicationError, DeviceModelId, LifecycleOrchestrator, PriceQuote, QuoteRequest, RepairType,
    UrgencyLevel,
};
use repairdesk_db::repositories::{
    SqlBookingRepository, SqlDeviceCatalog, SqlPricingRuleRepository, SqlTechnicianDirectory,
};

#[derive(Debug, Clone)]
pub struct QuoteArgs {
    pub device: String,
    pub repair_type: RepairType,
    pub urgency: UrgencyLevel,
    pub quantity: Option<u32>,
}

pub fn run(args: QuoteArgs) -> CommandResult {
    let (config, runtime) = match prepare("quote") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let mut request = QuoteRequest::new(
        DeviceModelId(args.device),
        args.repair_type,
        args.urgency,
        Utc::now(),
    );
    request.overrides.quantity = args.quantity;

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let quote = match LifecycleOrchestrator::from_config(
            &config,
            Arc::new(SqlPricingRuleRepository::new(pool.clone())),
            Arc::new(SqlDeviceCatalog::new(pool.clone())),
            Arc::new(SqlBookingRepository::new(pool.clone())),
            Arc::new(SqlTechnicianDirectory::new(pool.clone())),
        ) {
            Ok(orchestrator) => orchestrator.quote_price(&request).await.map_err(classify),
            Err(error) => Err(classify(error)),
        };
        pool.close().await;
        quote
    });

    let quote = match result {
        Ok(quote) => quote,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("quote", error_class, message, exit_code);
        }
    };

    match serde_json::to_value(&quote) {
        Ok(data) => CommandResult::success_with_data("quote", summary(&quote), data),
        Err(error) => CommandResult::failure("quote", "serialization", error.to_string(), 1),
    }
}

fn classify(error: ApplicationError) -> StepFailure {
    let (error_class, exit_code) = match &error {
        ApplicationError::DeviceNotFound(_)
        | ApplicationError::RuleNotFound(_)
        | ApplicationError::NotFound { .. } => ("not_found", 7),
        ApplicationError::Domain(_) => ("invalid_request", 8),
        ApplicationError::VersionConflict { .. } => ("conflict", 9),
        ApplicationError::Persistence(_) => ("db_connectivity", 4),
        ApplicationError::Configuration(_) => ("config_validation", 2),
    };
    (error_class, error.to_string(), exit_code)
}

fn summary(quote: &PriceQuote) -> String {
    let source = match &quote.rule_id {
        Some(rule_id) => format!("rule {rule_id}"),
        None => "fallback pricing".to_string(),
    };
    let mut line = format!(
        "{} {} ({}): {} via {source}, valid until {}",
        quote.device_model_id,
        quote.repair_type,
        quote.urgency,
        quote.final_price,
        quote.valid_until.to_rfc3339(),
    );
    if let Some(bulk) = &quote.bulk {
        line.push_str(&format!("; {} units for {}", bulk.quantity, bulk.total));
    }
    line
}
