//! Target Repository - monitored URLs

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::StoreError;
use super::models::{MonitorTarget, NewTarget};

pub struct TargetRepository {
    pool: PgPool,
}

impl TargetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enabled(&self) -> Result<Vec<MonitorTarget>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, title, description, disabled, created_at
            FROM monitor_targets
            WHERE disabled = FALSE
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to list targets: {}", e)))?;

        Ok(rows.iter().map(map_target).collect())
    }

    pub async fn get(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError> {
        let row = sqlx::query(
            "SELECT id, url, title, description, disabled, created_at FROM monitor_targets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to get target: {}", e)))?;

        Ok(row.as_ref().map(map_target))
    }

    pub async fn insert(&self, target: &NewTarget) -> Result<MonitorTarget, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO monitor_targets (url, title, description)
            VALUES ($1, $2, $3)
            RETURNING id, url, title, description, disabled, created_at
            "#,
        )
        .bind(&target.url)
        .bind(&target.title)
        .bind(&target.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to insert target: {}", e)))?;

        let target = map_target(&row);
        debug!(target_id = %target.id, url = %target.url, "Target inserted");
        Ok(target)
    }

    pub async fn disable(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE monitor_targets SET disabled = TRUE
            WHERE id = $1
            RETURNING id, url, title, description, disabled, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to disable target: {}", e)))?;

        Ok(row.as_ref().map(map_target))
    }
}

fn map_target(row: &PgRow) -> MonitorTarget {
    MonitorTarget {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        description: row.get("description"),
        disabled: row.get("disabled"),
        created_at: row.get("created_at"),
    }
}
