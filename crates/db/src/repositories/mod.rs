//! SQLite and in-memory implementations of the storage contracts declared in
//! `repairdesk_core::ports`.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use repairdesk_core::money::Factor;
pub use repairdesk_core::ports::{
    BookingRepository, DeviceCatalog, PricingRuleRepository, StorageError, TechnicianDirectory,
};

pub mod booking;
pub mod catalog;
pub mod memory;
pub mod pricing_rule;

pub use booking::SqlBookingRepository;
pub use catalog::{SqlDeviceCatalog, SqlTechnicianDirectory};
pub use memory::{
    InMemoryBookingRepository, InMemoryDeviceCatalog, InMemoryPricingRuleRepository,
    InMemoryTechnicianDirectory,
};
pub use pricing_rule::SqlPricingRuleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StorageError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StorageError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StorageError::Decode(message),
        }
    }
}

pub(crate) fn backend_error(error: sqlx::Error) -> StorageError {
    RepositoryError::Database(error).into()
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}`: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|raw| decode_timestamp(column, &raw)).transpose()
}

pub(crate) fn encode_factor(value: Option<Factor>) -> Option<String> {
    value.map(|factor| factor.value().to_string())
}

pub(crate) fn decode_factor(
    column: &str,
    raw: Option<String>,
) -> Result<Option<Factor>, RepositoryError> {
    raw.map(|raw| {
        Decimal::from_str(&raw)
            .map(Factor::new)
            .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}`: {error}")))
    })
    .transpose()
}

pub(crate) fn decode_version(raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("version `{raw}` out of range")))
}

pub(crate) fn decode_enum<T>(
    column: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown {column} `{raw}`")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};

    use super::{decode_factor, decode_timestamp, encode_factor, encode_timestamp};
    use repairdesk_core::money::Factor;

    #[test]
    fn timestamps_keep_sub_second_precision() {
        let at = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 30, 0)
            .unwrap()
            .with_nanosecond(123_456_789)
            .expect("valid nanos");

        let encoded = encode_timestamp(at);
        assert!(encoded.ends_with('Z'));
        assert_eq!(decode_timestamp("changed_at", &encoded).expect("decode"), at);
    }

    #[test]
    fn factors_are_stored_as_decimal_text() {
        let encoded = encode_factor(Some(Factor::from_parts(125, 2)));
        assert_eq!(encoded.as_deref(), Some("1.25"));
        assert_eq!(
            decode_factor("market_demand", encoded).expect("decode"),
            Some(Factor::from_parts(125, 2))
        );
        assert!(decode_factor("market_demand", Some("lots".to_string())).is_err());
    }
}
