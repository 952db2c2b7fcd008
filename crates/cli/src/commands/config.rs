use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use repairdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Renders the effective configuration, one line per field, each tagged
/// with where its value came from.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);
    let attribution = Attribution { file_path: file_path.as_deref(), file_doc: file_doc.as_ref() };

    let pricing = &config.pricing;
    let reprice_on =
        config.lifecycle.reprice_on.iter().map(|status| status.as_str()).collect::<Vec<_>>();
    let fields = [
        field("database.url", config.database.url.clone(), &["REPAIRDESK_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["REPAIRDESK_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["REPAIRDESK_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["REPAIRDESK_LOGGING_LEVEL", "REPAIRDESK_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["REPAIRDESK_LOGGING_FORMAT", "REPAIRDESK_LOG_FORMAT"],
        ),
        field(
            "pricing.factor_min",
            pricing.factor_bounds.min.normalize().to_string(),
            &["REPAIRDESK_PRICING_FACTOR_MIN"],
        ),
        field(
            "pricing.factor_max",
            pricing.factor_bounds.max.normalize().to_string(),
            &["REPAIRDESK_PRICING_FACTOR_MAX"],
        ),
        field("pricing.default_fallback_price", pricing.default_fallback_price.to_string(), &[]),
        field(
            "pricing.standard_quote_validity_hours",
            pricing.standard_quote_validity.num_hours().to_string(),
            &["REPAIRDESK_PRICING_STANDARD_QUOTE_VALIDITY_HOURS"],
        ),
        field(
            "pricing.elevated_quote_validity_hours",
            pricing.elevated_quote_validity.num_hours().to_string(),
            &["REPAIRDESK_PRICING_ELEVATED_QUOTE_VALIDITY_HOURS"],
        ),
        field("pricing.bulk_tiers", render_bulk_tiers(&config), &[]),
        field(
            "lifecycle.auto_assign_on_confirm",
            config.lifecycle.auto_assign_on_confirm.to_string(),
            &["REPAIRDESK_LIFECYCLE_AUTO_ASSIGN_ON_CONFIRM"],
        ),
        field("lifecycle.reprice_on", format!("[{}]", reprice_on.join(", ")), &[]),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .into_iter()
            .map(|field| render_line(field.key, &field.value, attribution.source(&field))),
    );
    lines.join("\n")
}

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key, value, env_keys }
}

struct Attribution<'a> {
    file_path: Option<&'a Path>,
    file_doc: Option<&'a Value>,
}

impl Attribution<'_> {
    fn source(&self, field: &Field) -> String {
        if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if self.file_doc.is_some_and(|doc| contains_path(doc, field.key)) {
            let file_path = self
                .file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }

        "default".to_string()
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("repairdesk.toml"), PathBuf::from("config/repairdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_bulk_tiers(config: &AppConfig) -> String {
    let tiers = config
        .pricing
        .bulk_tiers
        .iter()
        .map(|tier| format!("{}+ @ {}", tier.min_quantity, tier.discount_rate.normalize()))
        .collect::<Vec<_>>();
    format!("[{}]", tiers.join(", "))
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
