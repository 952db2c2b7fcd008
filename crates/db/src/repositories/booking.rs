use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use repairdesk_core::domain::booking::{
    Booking, BookingId, BookingSnapshot, BookingStatus, CustomerId, RepairType,
    StatusHistoryEntry, TechnicianId, UrgencyLevel,
};
use repairdesk_core::domain::device::DeviceModelId;
use repairdesk_core::money::Money;

use super::{
    backend_error, decode_enum, decode_optional_timestamp, decode_timestamp, decode_version,
    encode_timestamp, is_unique_violation, BookingRepository, RepositoryError, StorageError,
};
use crate::DbPool;

const BOOKING_COLUMNS: &str = "id, status, customer_id, device_model_id, repair_type, urgency,
    base_price_minor, final_price_minor, assigned_technician_id, scheduled_date,
    estimated_completion, completed_at, version, created_at, updated_at";

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    /// Reads the row and its history inside one transaction so a concurrent
    /// save is seen either entirely or not at all.
    async fn load_booking(&self, id: &BookingId) -> Result<Option<Booking>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE id = ?1"))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_error)?;
        let Some(row) = row else {
            tx.rollback().await.map_err(backend_error)?;
            return Ok(None);
        };

        let history_rows = sqlx::query(
            "SELECT from_status, to_status, changed_by, changed_at, note
             FROM booking_status_history
             WHERE booking_id = ?1
             ORDER BY sequence ASC",
        )
        .bind(&id.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend_error)?;
        tx.commit().await.map_err(backend_error)?;

        let history = history_rows.iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?;
        let snapshot = snapshot_from_row(&row, history)?;
        let booking = Booking::rehydrate(snapshot)
            .map_err(|error| StorageError::Decode(error.to_string()))?;
        Ok(Some(booking))
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let inserted = sqlx::query(
            "INSERT INTO booking (
                id, status, customer_id, device_model_id, repair_type, urgency,
                base_price_minor, final_price_minor, assigned_technician_id, scheduled_date,
                estimated_completion, completed_at, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&booking.id.0)
        .bind(booking.status().as_str())
        .bind(&booking.customer_id.0)
        .bind(&booking.device_model_id.0)
        .bind(booking.repair_type.as_str())
        .bind(booking.urgency.as_str())
        .bind(booking.base_price.minor_units())
        .bind(booking.final_price.minor_units())
        .bind(booking.assigned_technician_id.as_ref().map(|id| id.0.clone()))
        .bind(booking.scheduled_date.map(encode_timestamp))
        .bind(booking.estimated_completion.map(encode_timestamp))
        .bind(booking.completed_at.map(encode_timestamp))
        .bind(i64::from(booking.version))
        .bind(encode_timestamp(booking.created_at))
        .bind(encode_timestamp(booking.updated_at))
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                return Err(StorageError::Duplicate { entity: "booking", id: booking.id.0.clone() });
            }
            return Err(backend_error(error));
        }

        append_history(&mut tx, &booking.id, booking.status_history(), 0).await?;
        tx.commit().await.map_err(backend_error)?;

        debug!(event_name = "db.booking_inserted", booking_id = %booking.id, "booking inserted");
        Ok(())
    }

    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: u32,
    ) -> Result<u32, StorageError> {
        let next_version = expected_version + 1;
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let updated = sqlx::query(
            "UPDATE booking SET
                status = ?1,
                urgency = ?2,
                base_price_minor = ?3,
                final_price_minor = ?4,
                assigned_technician_id = ?5,
                scheduled_date = ?6,
                estimated_completion = ?7,
                completed_at = ?8,
                updated_at = ?9,
                version = ?10
             WHERE id = ?11 AND version = ?12",
        )
        .bind(booking.status().as_str())
        .bind(booking.urgency.as_str())
        .bind(booking.base_price.minor_units())
        .bind(booking.final_price.minor_units())
        .bind(booking.assigned_technician_id.as_ref().map(|id| id.0.clone()))
        .bind(booking.scheduled_date.map(encode_timestamp))
        .bind(booking.estimated_completion.map(encode_timestamp))
        .bind(booking.completed_at.map(encode_timestamp))
        .bind(encode_timestamp(booking.updated_at))
        .bind(i64::from(next_version))
        .bind(&booking.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await
        .map_err(backend_error)?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM booking WHERE id = ?1")
                    .bind(&booking.id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend_error)?;
            return Err(match actual {
                None => StorageError::Missing { entity: "booking", id: booking.id.0.clone() },
                Some(actual) => StorageError::VersionConflict {
                    entity: "booking",
                    id: booking.id.0.clone(),
                    expected: expected_version,
                    actual: decode_version(actual)?,
                },
            });
        }

        let stored_rows = sqlx::query(
            "SELECT from_status, to_status, changed_by, changed_at, note
             FROM booking_status_history
             WHERE booking_id = ?1
             ORDER BY sequence ASC",
        )
        .bind(&booking.id.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend_error)?;
        let stored = stored_rows.iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?;

        if !booking.status_history().starts_with(&stored) {
            return Err(StorageError::HistoryRewrite { booking_id: booking.id.clone() });
        }

        let appended = &booking.status_history()[stored.len()..];
        append_history(&mut tx, &booking.id, appended, stored.len()).await?;
        tx.commit().await.map_err(backend_error)?;

        debug!(
            event_name = "db.booking_saved",
            booking_id = %booking.id,
            version = next_version,
            appended_history = appended.len(),
            "booking saved"
        );
        Ok(next_version)
    }
}

async fn append_history(
    tx: &mut Transaction<'_, Sqlite>,
    booking_id: &BookingId,
    entries: &[StatusHistoryEntry],
    first_sequence: usize,
) -> Result<(), StorageError> {
    for (offset, entry) in entries.iter().enumerate() {
        let sequence = i64::try_from(first_sequence + offset)
            .map_err(|_| StorageError::Decode("history sequence out of range".to_string()))?;
        sqlx::query(
            "INSERT INTO booking_status_history
                (booking_id, sequence, from_status, to_status, changed_by, changed_at, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&booking_id.0)
        .bind(sequence)
        .bind(entry.from.as_str())
        .bind(entry.to.as_str())
        .bind(&entry.changed_by)
        .bind(encode_timestamp(entry.changed_at))
        .bind(&entry.note)
        .execute(&mut **tx)
        .await
        .map_err(backend_error)?;
    }
    Ok(())
}

fn history_from_row(row: &SqliteRow) -> Result<StatusHistoryEntry, RepositoryError> {
    let from: String = row.try_get("from_status")?;
    let to: String = row.try_get("to_status")?;
    let changed_at: String = row.try_get("changed_at")?;

    Ok(StatusHistoryEntry {
        from: decode_enum("from_status", &from, BookingStatus::parse)?,
        to: decode_enum("to_status", &to, BookingStatus::parse)?,
        changed_by: row.try_get("changed_by")?,
        changed_at: decode_timestamp("changed_at", &changed_at)?,
        note: row.try_get("note")?,
    })
}

fn snapshot_from_row(
    row: &SqliteRow,
    status_history: Vec<StatusHistoryEntry>,
) -> Result<BookingSnapshot, RepositoryError> {
    let status: String = row.try_get("status")?;
    let repair_type: String = row.try_get("repair_type")?;
    let urgency: String = row.try_get("urgency")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(BookingSnapshot {
        id: BookingId(row.try_get("id")?),
        status: decode_enum("status", &status, BookingStatus::parse)?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        device_model_id: DeviceModelId(row.try_get("device_model_id")?),
        repair_type: decode_enum("repair_type", &repair_type, RepairType::parse)?,
        urgency: decode_enum("urgency", &urgency, UrgencyLevel::parse)?,
        base_price: Money::from_minor(row.try_get("base_price_minor")?),
        final_price: Money::from_minor(row.try_get("final_price_minor")?),
        assigned_technician_id: row
            .try_get::<Option<String>, _>("assigned_technician_id")?
            .map(TechnicianId),
        scheduled_date: decode_optional_timestamp(
            "scheduled_date",
            row.try_get("scheduled_date")?,
        )?,
        estimated_completion: decode_optional_timestamp(
            "estimated_completion",
            row.try_get("estimated_completion")?,
        )?,
        completed_at: decode_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        status_history,
        version: decode_version(row.try_get("version")?)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}
