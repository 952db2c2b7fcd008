use sqlx::Row;

use repairdesk_core::domain::booking::TechnicianId;
use repairdesk_core::domain::device::{DeviceCategory, DeviceModel, DeviceModelId};

use super::{
    backend_error, decode_enum, DeviceCatalog, RepositoryError, StorageError, TechnicianDirectory,
};
use crate::DbPool;

pub struct SqlDeviceCatalog {
    pool: DbPool,
}

impl SqlDeviceCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a device model.
    pub async fn register(&self, device: &DeviceModel) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO device_model (id, brand, name, category) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                brand = excluded.brand,
                name = excluded.name,
                category = excluded.category",
        )
        .bind(&device.id.0)
        .bind(&device.brand)
        .bind(&device.name)
        .bind(device.category.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeviceCatalog for SqlDeviceCatalog {
    async fn find_device(&self, id: &DeviceModelId) -> Result<Option<DeviceModel>, StorageError> {
        let row = sqlx::query("SELECT id, brand, name, category FROM device_model WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let category: String = row.try_get("category").map_err(backend_error)?;
        Ok(Some(DeviceModel {
            id: DeviceModelId(row.try_get("id").map_err(backend_error)?),
            brand: row.try_get("brand").map_err(backend_error)?,
            name: row.try_get("name").map_err(backend_error)?,
            category: decode_enum("category", &category, DeviceCategory::parse)?,
        }))
    }
}

pub struct SqlTechnicianDirectory {
    pool: DbPool,
}

impl SqlTechnicianDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        id: &TechnicianId,
        display_name: &str,
        is_available: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO technician (id, display_name, is_available) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                is_available = excluded.is_available",
        )
        .bind(&id.0)
        .bind(display_name)
        .bind(is_available)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `false` when no technician has this id.
    pub async fn set_available(
        &self,
        id: &TechnicianId,
        is_available: bool,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE technician SET is_available = ?1 WHERE id = ?2")
            .bind(is_available)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl TechnicianDirectory for SqlTechnicianDirectory {
    async fn available_technicians(&self) -> Result<Vec<TechnicianId>, StorageError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM technician WHERE is_available = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(backend_error)?;
        Ok(ids.into_iter().map(TechnicianId).collect())
    }
}
