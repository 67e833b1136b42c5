//! Persistence for validators, monitor targets, ticks and settlements
//!
//! `PersistenceGateway` is the narrow contract the coordinator and the
//! settlement state machine are written against. Two implementations:
//! - `DatabasePool` - PostgreSQL via sqlx, one repository per table
//! - `MemoryStore` - in-process fallback for development and tests

pub mod memory;
pub mod models;
pub mod pool;
pub mod settlements;
pub mod targets;
pub mod ticks;
pub mod validators;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{FaultPoint, MemoryStore};
pub use models::{
    MonitorTarget, NewSettlement, NewTarget, NewTick, SettlementTransaction, Tick, TickStatus,
    Validator, ValidatorSignup, WithdrawalLock,
};
pub use pool::DatabasePool;
pub use settlements::SettlementRepository;
pub use targets::TargetRepository;
pub use ticks::TickRepository;
pub use validators::ValidatorRepository;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Storage contract.
///
/// Every method is a single atomic unit: the multi-row operations
/// (`record_tick`, `begin_withdrawal`, `complete_withdrawal`,
/// `rollback_withdrawal`) either apply entirely or not at all.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_validator(&self, id: i32) -> Result<Option<Validator>, StoreError>;

    async fn find_validator(&self, public_key: &str) -> Result<Option<Validator>, StoreError>;

    /// Update ip/location of an existing key, or insert it with a zero balance
    async fn upsert_validator(&self, signup: &ValidatorSignup) -> Result<Validator, StoreError>;

    /// Overwrite the outstanding challenge. Returns false if the key is unknown.
    async fn store_challenge(
        &self,
        public_key: &str,
        message: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set the processing lock, clear the challenge and debit `amount`, guarded by
    /// "unlocked AND balance >= amount AND challenge == `challenge` AND not expired at `now`"
    async fn begin_withdrawal(
        &self,
        public_key: &str,
        challenge: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalLock, StoreError>;

    /// Insert the settlement record and clear the lock
    async fn complete_withdrawal(
        &self,
        record: &NewSettlement,
    ) -> Result<SettlementTransaction, StoreError>;

    /// Re-credit `amount` and clear the lock
    async fn rollback_withdrawal(&self, public_key: &str, amount: i64)
    -> Result<Validator, StoreError>;

    /// Insert a tick and credit `reward` to the observing validator
    async fn record_tick(&self, tick: &NewTick, reward: i64) -> Result<Tick, StoreError>;

    async fn enabled_targets(&self) -> Result<Vec<MonitorTarget>, StoreError>;

    async fn get_target(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError>;

    async fn create_target(&self, target: &NewTarget) -> Result<MonitorTarget, StoreError>;

    /// Soft-disable; returns None when the target does not exist
    async fn disable_target(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError>;

    async fn recent_ticks(&self, target_id: i32, limit: i64) -> Result<Vec<Tick>, StoreError>;

    /// Newest first
    async fn settlements_for(
        &self,
        validator_id: i32,
    ) -> Result<Vec<SettlementTransaction>, StoreError>;
}
