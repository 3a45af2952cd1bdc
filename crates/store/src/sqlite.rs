use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row as _};
use tracing::debug;
use uuid::Uuid;

use stocktake_core::gateway::{ContainerId, FormatSpec, Row, SectionId, StoreError, TabularStore};

use crate::DbPool;

/// Tabular Store backed by the local SQLite database.
///
/// Containers map to rows of `container`, sections to rows of `section`;
/// cells and formatting are stored as JSON.
pub struct SqliteTabularStore {
    pool: DbPool,
}

impl SqliteTabularStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Rows of a section in write order.
    pub async fn read_rows(
        &self,
        container: &ContainerId,
        section: &str,
    ) -> Result<Vec<Row>, StoreError> {
        let section_id = self.section_id(container, section).await?;
        let rows = sqlx::query(
            "SELECT cells_json
             FROM section_row
             WHERE section_id = ?
             ORDER BY row_index ASC",
        )
        .bind(&section_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(cells_from_row).collect()
    }

    pub async fn read_format(&self, section: &SectionId) -> Result<Option<FormatSpec>, StoreError> {
        let row = sqlx::query("SELECT format_json FROM section_format WHERE section_id = ?")
            .bind(&section.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|row| {
            let raw: String = row.try_get("format_json").map_err(backend)?;
            serde_json::from_str(&raw).map_err(|error| StoreError::Backend(error.to_string()))
        })
        .transpose()
    }

    async fn section_id(
        &self,
        container: &ContainerId,
        section: &str,
    ) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT id FROM section WHERE container_id = ? AND name = ?")
            .bind(&container.0)
            .bind(section)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => row.try_get("id").map_err(backend),
            None => Err(StoreError::SectionNotFound {
                container: container.0.clone(),
                section: section.to_owned(),
            }),
        }
    }
}

#[async_trait]
impl TabularStore for SqliteTabularStore {
    async fn find_or_create_container(&self, name: &str) -> Result<ContainerId, StoreError> {
        sqlx::query(
            "INSERT INTO container (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        self.find_container(name)
            .await?
            .ok_or_else(|| StoreError::ContainerNotFound(name.to_owned()))
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, StoreError> {
        let row = sqlx::query("SELECT id FROM container WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|row| row.try_get("id").map(ContainerId).map_err(backend)).transpose()
    }

    async fn list_sections(&self, container: &ContainerId) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT name
             FROM section
             WHERE container_id = ?
             ORDER BY position ASC",
        )
        .bind(&container.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(|row| row.try_get("name").map_err(backend)).collect()
    }

    async fn create_section(
        &self,
        container: &ContainerId,
        name: &str,
    ) -> Result<SectionId, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM container WHERE id = ?")
            .bind(&container.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        if exists.is_none() {
            return Err(StoreError::ContainerNotFound(container.0.clone()));
        }

        let inserted = sqlx::query(
            "INSERT INTO section (id, container_id, name, position, created_at)
             VALUES (
                ?, ?, ?,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM section WHERE container_id = ?),
                ?
             )
             ON CONFLICT(container_id, name) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&container.0)
        .bind(name)
        .bind(&container.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        debug!(
            event_name = "store.section_created",
            container = %container.0,
            section = name,
            existed = inserted.rows_affected() == 0,
            "section ready"
        );
        self.section_id(container, name).await.map(SectionId)
    }

    async fn write_rows(
        &self,
        container: &ContainerId,
        section: &str,
        rows: &[Row],
    ) -> Result<(), StoreError> {
        let section_id = self.section_id(container, section).await?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM section_row WHERE section_id = ?")
            .bind(&section_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for (index, cells) in rows.iter().enumerate() {
            let cells_json = serde_json::to_string(cells)
                .map_err(|error| StoreError::Backend(error.to_string()))?;
            sqlx::query(
                "INSERT INTO section_row (section_id, row_index, cells_json) VALUES (?, ?, ?)",
            )
            .bind(&section_id)
            .bind(i64::try_from(index).unwrap_or(i64::MAX))
            .bind(cells_json)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn apply_formatting(
        &self,
        container: &ContainerId,
        section: &SectionId,
        spec: &FormatSpec,
    ) -> Result<(), StoreError> {
        let format_json =
            serde_json::to_string(spec).map_err(|error| StoreError::Backend(error.to_string()))?;
        let updated = sqlx::query(
            "INSERT INTO section_format (section_id, format_json, applied_at)
             SELECT id, ?, ? FROM section WHERE id = ? AND container_id = ?
             ON CONFLICT(section_id) DO UPDATE SET
                format_json = excluded.format_json,
                applied_at = excluded.applied_at",
        )
        .bind(format_json)
        .bind(Utc::now().to_rfc3339())
        .bind(&section.0)
        .bind(&container.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::SectionNotFound {
                container: container.0.clone(),
                section: section.0.clone(),
            });
        }
        Ok(())
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        other => StoreError::Backend(other.to_string()),
    }
}

fn cells_from_row(row: &SqliteRow) -> Result<Row, StoreError> {
    let raw: String = row.try_get("cells_json").map_err(backend)?;
    serde_json::from_str(&raw).map_err(|error| StoreError::Backend(error.to_string()))
}
