use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::channel_models::ChannelRecord;
use crate::error::Error;
use crate::stream::Brand;

const CHANNEL_COLUMNS: &str = "id, owner_id, name, host, rtsp_port, http_port, channel_number, \
     transport, username, password, brand, enabled, created_at, updated_at";

/// Registered channels repository
#[derive(Clone)]
pub struct ChannelsRepository {
    pool: Arc<PgPool>,
}

impl ChannelsRepository {
    /// Create a new channels repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Register a new channel.
    pub async fn create(&self, record: &ChannelRecord) -> Result<ChannelRecord> {
        let result = sqlx::query_as::<_, ChannelRecord>(&format!(
            r#"
            INSERT INTO channels (
                id, owner_id, name, host, rtsp_port, http_port, channel_number,
                transport, username, password, brand, enabled, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.name)
        .bind(&record.host)
        .bind(record.rtsp_port)
        .bind(record.http_port)
        .bind(record.channel_number)
        .bind(&record.transport)
        .bind(&record.username)
        .bind(&record.password)
        .bind(&record.brand)
        .bind(record.enabled)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create channel: {}", e)))?;

        Ok(result)
    }

    /// All channels that should be streaming.
    pub async fn get_enabled(&self) -> Result<Vec<ChannelRecord>> {
        let result = sqlx::query_as::<_, ChannelRecord>(&format!(
            r#"
            SELECT {}
            FROM channels
            WHERE enabled = TRUE
            ORDER BY created_at
            "#,
            CHANNEL_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get enabled channels: {}", e)))?;

        Ok(result)
    }

    /// Get a channel by ID.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ChannelRecord>> {
        let result = sqlx::query_as::<_, ChannelRecord>(&format!(
            r#"
            SELECT {}
            FROM channels
            WHERE id = $1
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get channel by ID: {}", e)))?;

        Ok(result)
    }

    /// Cache the probed brand on a channel. Written once by the prober.
    pub async fn set_brand(&self, id: Uuid, brand: Brand) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channels
            SET brand = $2, updated_at = now()
            WHERE id = $1 AND brand IS NULL
            "#,
        )
        .bind(id)
        .bind(brand.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to set channel brand: {}", e)))?;

        Ok(())
    }

    /// Remove a channel registration.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete channel: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
