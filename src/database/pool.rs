//! Database Connection Pool using sqlx

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::models::*;
use super::settlements::SettlementRepository;
use super::targets::TargetRepository;
use super::ticks::TickRepository;
use super::validators::ValidatorRepository;
use super::{PersistenceGateway, StoreError};

const SCHEMA: &[(&str, &str)] = &[
    (
        "validators",
        r#"
        CREATE TABLE IF NOT EXISTS validators (
            id SERIAL PRIMARY KEY,
            public_key TEXT NOT NULL UNIQUE,
            chain TEXT NOT NULL DEFAULT 'sol',
            location TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            pending_payouts BIGINT NOT NULL DEFAULT 0 CHECK (pending_payouts >= 0),
            temp_signed_message TEXT,
            signed_message_expiry TIMESTAMPTZ,
            is_processing BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "monitor_targets",
        r#"
        CREATE TABLE IF NOT EXISTS monitor_targets (
            id SERIAL PRIMARY KEY,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            disabled BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "ticks",
        r#"
        CREATE TABLE IF NOT EXISTS ticks (
            id BIGSERIAL PRIMARY KEY,
            target_id INTEGER NOT NULL REFERENCES monitor_targets(id) ON DELETE CASCADE,
            validator_id INTEGER NOT NULL REFERENCES validators(id),
            status TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            location TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "settlement_transactions",
        r#"
        CREATE TABLE IF NOT EXISTS settlement_transactions (
            id BIGSERIAL PRIMARY KEY,
            from_public_key TEXT NOT NULL,
            to_public_key TEXT NOT NULL,
            receipt_id TEXT NOT NULL,
            amount BIGINT NOT NULL,
            validator_id INTEGER NOT NULL REFERENCES validators(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

pub struct DatabasePool {
    pool: PgPool,
    validators: ValidatorRepository,
    targets: TargetRepository,
    ticks: TickRepository,
    settlements: SettlementRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        Ok(Self {
            validators: ValidatorRepository::new(pool.clone()),
            targets: TargetRepository::new(pool.clone()),
            ticks: TickRepository::new(pool.clone()),
            settlements: SettlementRepository::new(pool.clone()),
            pool,
        })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Initializing database schema...");

        for (table, ddl) in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(format!("Failed to create {}: {}", table, e)))?;
        }

        info!("Database schema initialized");
        Ok(())
    }
}

fn tx_error(stage: &str, e: sqlx::Error) -> StoreError {
    StoreError::Database(format!("Failed to {} transaction: {}", stage, e))
}

#[async_trait]
impl PersistenceGateway for DatabasePool {
    async fn get_validator(&self, id: i32) -> Result<Option<Validator>, StoreError> {
        self.validators.get(id).await
    }

    async fn find_validator(&self, public_key: &str) -> Result<Option<Validator>, StoreError> {
        self.validators.find_by_public_key(public_key).await
    }

    async fn upsert_validator(&self, signup: &ValidatorSignup) -> Result<Validator, StoreError> {
        self.validators.upsert_signup(signup).await
    }

    async fn store_challenge(
        &self,
        public_key: &str,
        message: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.validators
            .store_challenge(public_key, message, expires_at)
            .await
    }

    async fn begin_withdrawal(
        &self,
        public_key: &str,
        challenge: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalLock, StoreError> {
        self.validators
            .try_lock_and_debit(public_key, challenge, amount, now)
            .await
    }

    async fn complete_withdrawal(
        &self,
        record: &NewSettlement,
    ) -> Result<SettlementTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| tx_error("begin", e))?;

        let settlement = self.settlements.insert(&mut tx, record).await?;
        self.validators.clear_lock(&mut tx, record.validator_id).await?;

        tx.commit().await.map_err(|e| tx_error("commit", e))?;
        Ok(settlement)
    }

    async fn rollback_withdrawal(
        &self,
        public_key: &str,
        amount: i64,
    ) -> Result<Validator, StoreError> {
        self.validators.recredit_and_unlock(public_key, amount).await
    }

    async fn record_tick(&self, tick: &NewTick, reward: i64) -> Result<Tick, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| tx_error("begin", e))?;

        let record = self.ticks.insert(&mut tx, tick).await?;
        self.validators.credit(&mut tx, tick.validator_id, reward).await?;

        tx.commit().await.map_err(|e| tx_error("commit", e))?;
        debug!(tick_id = %record.id, validator_id = %tick.validator_id, "Tick recorded and credited");
        Ok(record)
    }

    async fn enabled_targets(&self) -> Result<Vec<MonitorTarget>, StoreError> {
        self.targets.enabled().await
    }

    async fn get_target(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError> {
        self.targets.get(id).await
    }

    async fn create_target(&self, target: &NewTarget) -> Result<MonitorTarget, StoreError> {
        self.targets.insert(target).await
    }

    async fn disable_target(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError> {
        self.targets.disable(id).await
    }

    async fn recent_ticks(&self, target_id: i32, limit: i64) -> Result<Vec<Tick>, StoreError> {
        self.ticks.recent(target_id, limit).await
    }

    async fn settlements_for(
        &self,
        validator_id: i32,
    ) -> Result<Vec<SettlementTransaction>, StoreError> {
        self.settlements.for_validator(validator_id).await
    }
}
