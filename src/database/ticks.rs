//! Tick Repository - append-only check observations

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use super::StoreError;
use super::models::{NewTick, Tick, TickStatus};

pub struct TickRepository {
    pool: PgPool,
}

impl TickRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert on the caller's connection so it can share a transaction
    pub async fn insert(&self, conn: &mut PgConnection, tick: &NewTick) -> Result<Tick, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ticks (target_id, validator_id, status, latency_ms, location)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, target_id, validator_id, status, latency_ms, location, created_at
            "#,
        )
        .bind(tick.target_id)
        .bind(tick.validator_id)
        .bind(tick.status.as_str())
        .bind(tick.latency_ms)
        .bind(&tick.location)
        .fetch_one(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to insert tick: {}", e)))?;

        map_tick(&row)
    }

    pub async fn recent(&self, target_id: i32, limit: i64) -> Result<Vec<Tick>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_id, validator_id, status, latency_ms, location, created_at
            FROM ticks
            WHERE target_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(target_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to get ticks: {}", e)))?;

        rows.iter().map(map_tick).collect()
    }
}

fn map_tick(row: &PgRow) -> Result<Tick, StoreError> {
    let status: String = row.get("status");
    let status = status.parse::<TickStatus>().map_err(StoreError::Corrupt)?;

    Ok(Tick {
        id: row.get("id"),
        target_id: row.get("target_id"),
        validator_id: row.get("validator_id"),
        status,
        latency_ms: row.get("latency_ms"),
        location: row.get("location"),
        created_at: row.get("created_at"),
    })
}
