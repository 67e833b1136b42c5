//! Settlement Repository - confirmed payout transfers

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use super::StoreError;
use super::models::{NewSettlement, SettlementTransaction};

pub struct SettlementRepository {
    pool: PgPool,
}

impl SettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        record: &NewSettlement,
    ) -> Result<SettlementTransaction, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO settlement_transactions
            (from_public_key, to_public_key, receipt_id, amount, validator_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, from_public_key, to_public_key, receipt_id, amount, validator_id, created_at
            "#,
        )
        .bind(&record.from_public_key)
        .bind(&record.to_public_key)
        .bind(&record.receipt_id)
        .bind(record.amount)
        .bind(record.validator_id)
        .fetch_one(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to insert settlement: {}", e)))?;

        debug!(receipt_id = %record.receipt_id, validator_id = %record.validator_id, "Settlement recorded");
        Ok(map_settlement(&row))
    }

    pub async fn for_validator(
        &self,
        validator_id: i32,
    ) -> Result<Vec<SettlementTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_public_key, to_public_key, receipt_id, amount, validator_id, created_at
            FROM settlement_transactions
            WHERE validator_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(validator_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to get settlements: {}", e)))?;

        Ok(rows.iter().map(map_settlement).collect())
    }
}

fn map_settlement(row: &PgRow) -> SettlementTransaction {
    SettlementTransaction {
        id: row.get("id"),
        from_public_key: row.get("from_public_key"),
        to_public_key: row.get("to_public_key"),
        receipt_id: row.get("receipt_id"),
        amount: row.get("amount"),
        validator_id: row.get("validator_id"),
        created_at: row.get("created_at"),
    }
}
