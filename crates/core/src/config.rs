use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::booking::{BookingStatus, RepairType, UrgencyLevel};
use crate::lifecycle::{LifecycleConfig, TransitionTable};
use crate::money::{round_half_up, Factor, Money};
use crate::pricing::{BulkTier, PricingConfig};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub pricing: PricingConfig,
    pub lifecycle: LifecycleSettings,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub auto_assign_on_confirm: bool,
    pub reprice_on: BTreeSet<BookingStatus>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub auto_assign_on_confirm: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://repairdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            pricing: PricingConfig::default(),
            lifecycle: LifecycleSettings {
                auto_assign_on_confirm: true,
                reprice_on: BTreeSet::new(),
            },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("repairdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Lifecycle policy for the state machine, using the standard
    /// transition table.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            transitions: TransitionTable::standard(),
            auto_assign_on_confirm: self.lifecycle.auto_assign_on_confirm,
            reprice_on: self.lifecycle.reprice_on.clone(),
            ..LifecycleConfig::default()
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(pricing) = patch.pricing {
            self.apply_pricing_patch(pricing)?;
        }

        if let Some(lifecycle) = patch.lifecycle {
            if let Some(auto_assign) = lifecycle.auto_assign_on_confirm {
                self.lifecycle.auto_assign_on_confirm = auto_assign;
            }
            if let Some(reprice_on) = lifecycle.reprice_on {
                self.lifecycle.reprice_on = reprice_on
                    .iter()
                    .map(|raw| {
                        BookingStatus::parse(raw).ok_or_else(|| {
                            ConfigError::Validation(format!(
                                "lifecycle.reprice_on contains unknown status `{raw}`"
                            ))
                        })
                    })
                    .collect::<Result<_, _>>()?;
            }
        }

        Ok(())
    }

    fn apply_pricing_patch(&mut self, pricing: PricingPatch) -> Result<(), ConfigError> {
        let target = &mut self.pricing;

        if let Some(factor_min) = pricing.factor_min {
            target.factor_bounds.min = factor_min;
        }
        if let Some(factor_max) = pricing.factor_max {
            target.factor_bounds.max = factor_max;
        }
        if let Some(price) = pricing.default_fallback_price {
            target.default_fallback_price = major_units("pricing.default_fallback_price", price)?;
        }
        for (raw, price) in pricing.fallback_prices.unwrap_or_default() {
            let repair_type = RepairType::parse(&raw).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "pricing.fallback_prices contains unknown repair type `{raw}`"
                ))
            })?;
            let price = major_units(&format!("pricing.fallback_prices.{raw}"), price)?;
            target.fallback_base_prices.insert(repair_type, price);
        }
        for (raw, factor) in pricing.urgency_multipliers.unwrap_or_default() {
            let urgency = UrgencyLevel::parse(&raw).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "pricing.urgency_multipliers contains unknown urgency `{raw}`"
                ))
            })?;
            target.urgency_multipliers.insert(urgency, Factor::new(factor));
        }
        for (raw, factor) in pricing.seasonal_factors.unwrap_or_default() {
            let month = raw.trim().parse::<u32>().ok().filter(|month| (1..=12).contains(month));
            let month = month.ok_or_else(|| {
                ConfigError::Validation(format!(
                    "pricing.seasonal_factors keys must be months 1..=12, got `{raw}`"
                ))
            })?;
            target.seasonal_factors.insert(month, Factor::new(factor));
        }
        if let Some(hours) = pricing.standard_quote_validity_hours {
            target.standard_quote_validity = Duration::hours(i64::from(hours));
        }
        if let Some(hours) = pricing.elevated_quote_validity_hours {
            target.elevated_quote_validity = Duration::hours(i64::from(hours));
        }
        if let Some(tiers) = pricing.bulk_tiers {
            target.bulk_tiers = tiers
                .into_iter()
                .map(|tier| BulkTier {
                    min_quantity: tier.min_quantity,
                    discount_rate: tier.discount_rate,
                })
                .collect();
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REPAIRDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("REPAIRDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("REPAIRDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("REPAIRDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("REPAIRDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("REPAIRDESK_LOGGING_LEVEL").or_else(|| read_env("REPAIRDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REPAIRDESK_LOGGING_FORMAT").or_else(|| read_env("REPAIRDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("REPAIRDESK_PRICING_FACTOR_MIN") {
            self.pricing.factor_bounds.min =
                parse_decimal("REPAIRDESK_PRICING_FACTOR_MIN", &value)?;
        }
        if let Some(value) = read_env("REPAIRDESK_PRICING_FACTOR_MAX") {
            self.pricing.factor_bounds.max =
                parse_decimal("REPAIRDESK_PRICING_FACTOR_MAX", &value)?;
        }
        if let Some(value) = read_env("REPAIRDESK_PRICING_STANDARD_QUOTE_VALIDITY_HOURS") {
            let hours = parse_u32("REPAIRDESK_PRICING_STANDARD_QUOTE_VALIDITY_HOURS", &value)?;
            self.pricing.standard_quote_validity = Duration::hours(i64::from(hours));
        }
        if let Some(value) = read_env("REPAIRDESK_PRICING_ELEVATED_QUOTE_VALIDITY_HOURS") {
            let hours = parse_u32("REPAIRDESK_PRICING_ELEVATED_QUOTE_VALIDITY_HOURS", &value)?;
            self.pricing.elevated_quote_validity = Duration::hours(i64::from(hours));
        }

        if let Some(value) = read_env("REPAIRDESK_LIFECYCLE_AUTO_ASSIGN_ON_CONFIRM") {
            self.lifecycle.auto_assign_on_confirm =
                parse_bool("REPAIRDESK_LIFECYCLE_AUTO_ASSIGN_ON_CONFIRM", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(auto_assign) = overrides.auto_assign_on_confirm {
            self.lifecycle.auto_assign_on_confirm = auto_assign;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_pricing(&self.pricing)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("repairdesk.toml"), PathBuf::from("config/repairdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    let bounds = pricing.factor_bounds;
    if bounds.min <= Decimal::ZERO || !bounds.contains(Factor::ONE) {
        return Err(ConfigError::Validation(format!(
            "pricing factor bounds {}..={} must be positive and include 1.0",
            bounds.min, bounds.max
        )));
    }

    let mut fallback_prices = pricing
        .fallback_base_prices
        .values()
        .chain(std::iter::once(&pricing.default_fallback_price));
    if fallback_prices.any(|price| !price.is_positive()) {
        return Err(ConfigError::Validation(
            "pricing fallback prices must be greater than zero".to_string(),
        ));
    }

    let configured_factors = pricing
        .urgency_multipliers
        .values()
        .map(|factor| ("pricing.urgency_multipliers", factor))
        .chain(
            pricing.seasonal_factors.values().map(|factor| ("pricing.seasonal_factors", factor)),
        );
    for (name, factor) in configured_factors {
        bounds
            .check(name, *factor)
            .map_err(|error| ConfigError::Validation(error.to_string()))?;
    }

    if pricing.standard_quote_validity <= Duration::zero()
        || pricing.elevated_quote_validity <= Duration::zero()
    {
        return Err(ConfigError::Validation(
            "pricing quote validity hours must be greater than zero".to_string(),
        ));
    }

    for tier in &pricing.bulk_tiers {
        if tier.min_quantity == 0
            || tier.discount_rate < Decimal::ZERO
            || tier.discount_rate >= Decimal::ONE
        {
            return Err(ConfigError::Validation(format!(
                "pricing.bulk_tiers entry (min_quantity {}, discount_rate {}) needs a quantity \
                 of at least 1 and a rate in 0..1",
                tier.min_quantity, tier.discount_rate
            )));
        }
    }

    Ok(())
}

fn major_units(key: &str, value: Decimal) -> Result<Money, ConfigError> {
    round_half_up(value * Decimal::ONE_HUNDRED)
        .map_err(|error| ConfigError::Validation(format!("{key}: {error}")))
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    pricing: Option<PricingPatch>,
    lifecycle: Option<LifecyclePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    factor_min: Option<Decimal>,
    factor_max: Option<Decimal>,
    default_fallback_price: Option<Decimal>,
    fallback_prices: Option<BTreeMap<String, Decimal>>,
    urgency_multipliers: Option<BTreeMap<String, Decimal>>,
    seasonal_factors: Option<BTreeMap<String, Decimal>>,
    standard_quote_validity_hours: Option<u32>,
    elevated_quote_validity_hours: Option<u32>,
    bulk_tiers: Option<Vec<BulkTierPatch>>,
}

#[derive(Debug, Deserialize)]
struct BulkTierPatch {
    min_quantity: u32,
    discount_rate: Decimal,
}

#[derive(Debug, Default, Deserialize)]
struct LifecyclePatch {
    auto_assign_on_confirm: Option<bool>,
    reprice_on: Option<Vec<String>>,
}
