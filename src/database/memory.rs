//! In-memory persistence (used when PostgreSQL is disabled, and by tests)
//!
//! All state sits behind one lock, so every gateway call is atomic with
//! respect to every other call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::models::*;
use super::{PersistenceGateway, StoreError};

/// Gateway operation that can be made to fail once, for exercising failure paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    RecordTick,
    StoreChallenge,
    BeginWithdrawal,
    CompleteWithdrawal,
    RollbackWithdrawal,
}

#[derive(Debug, Default)]
struct MemoryState {
    validators: BTreeMap<i32, Validator>,
    targets: BTreeMap<i32, MonitorTarget>,
    ticks: Vec<Tick>,
    settlements: Vec<SettlementTransaction>,
    next_validator_id: i32,
    next_target_id: i32,
    faults: HashSet<FaultPoint>,
}

impl MemoryState {
    fn take_fault(&mut self, point: FaultPoint) -> Result<(), StoreError> {
        if self.faults.remove(&point) {
            return Err(StoreError::Database(format!("injected fault at {:?}", point)));
        }
        Ok(())
    }

    fn by_key_mut(&mut self, public_key: &str) -> Option<&mut Validator> {
        self.validators
            .values_mut()
            .find(|v| v.public_key == public_key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Using in-memory store (dev mode)");
        Self::default()
    }

    /// Make the next call at `point` fail with a database error
    pub async fn inject_fault(&self, point: FaultPoint) {
        self.state.write().await.faults.insert(point);
    }

    /// Insert or overwrite a validator with the given balance
    pub async fn seed_validator(&self, public_key: &str, balance: i64) -> Validator {
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_key_mut(public_key) {
            existing.pending_payouts = balance;
            return existing.clone();
        }

        state.next_validator_id += 1;
        let validator = Validator {
            id: state.next_validator_id,
            public_key: public_key.to_string(),
            location: "localhost".to_string(),
            ip_address: "127.0.0.1".to_string(),
            pending_payouts: balance,
            temp_signed_message: None,
            signed_message_expiry: None,
            is_processing: false,
            created_at: Utc::now(),
        };
        state.validators.insert(validator.id, validator.clone());
        validator
    }

    /// Overwrite the stored challenge expiry (lets tests age a challenge)
    pub async fn set_challenge_expiry(&self, public_key: &str, expires_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(validator) = state.by_key_mut(public_key) {
            validator.signed_message_expiry = Some(expires_at);
        }
    }

    pub async fn ticks(&self) -> Vec<Tick> {
        self.state.read().await.ticks.clone()
    }

    pub async fn settlements(&self) -> Vec<SettlementTransaction> {
        self.state.read().await.settlements.clone()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn get_validator(&self, id: i32) -> Result<Option<Validator>, StoreError> {
        Ok(self.state.read().await.validators.get(&id).cloned())
    }

    async fn find_validator(&self, public_key: &str) -> Result<Option<Validator>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .validators
            .values()
            .find(|v| v.public_key == public_key)
            .cloned())
    }

    async fn upsert_validator(&self, signup: &ValidatorSignup) -> Result<Validator, StoreError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.by_key_mut(&signup.public_key) {
            existing.ip_address = signup.ip_address.clone();
            existing.location = signup.location.clone();
            return Ok(existing.clone());
        }

        state.next_validator_id += 1;
        let validator = Validator {
            id: state.next_validator_id,
            public_key: signup.public_key.clone(),
            location: signup.location.clone(),
            ip_address: signup.ip_address.clone(),
            pending_payouts: 0,
            temp_signed_message: None,
            signed_message_expiry: None,
            is_processing: false,
            created_at: Utc::now(),
        };
        state.validators.insert(validator.id, validator.clone());
        debug!(validator_id = %validator.id, "Validator inserted");
        Ok(validator)
    }

    async fn store_challenge(
        &self,
        public_key: &str,
        message: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::StoreChallenge)?;

        match state.by_key_mut(public_key) {
            Some(validator) => {
                validator.temp_signed_message = Some(message.to_string());
                validator.signed_message_expiry = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn begin_withdrawal(
        &self,
        public_key: &str,
        challenge: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalLock, StoreError> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::BeginWithdrawal)?;

        let Some(validator) = state.by_key_mut(public_key) else {
            return Ok(WithdrawalLock::NotFound);
        };

        if validator.is_processing {
            return Ok(WithdrawalLock::AlreadyLocked);
        }
        if validator.temp_signed_message.as_deref() != Some(challenge) {
            return Ok(WithdrawalLock::ChallengeMismatch);
        }
        if validator.signed_message_expiry.is_none_or(|expiry| expiry <= now) {
            return Ok(WithdrawalLock::ChallengeExpired);
        }
        if validator.pending_payouts < amount {
            return Ok(WithdrawalLock::InsufficientFunds {
                balance: validator.pending_payouts,
            });
        }

        validator.is_processing = true;
        validator.temp_signed_message = None;
        validator.signed_message_expiry = None;
        validator.pending_payouts -= amount;

        Ok(WithdrawalLock::Acquired(validator.clone()))
    }

    async fn complete_withdrawal(
        &self,
        record: &NewSettlement,
    ) -> Result<SettlementTransaction, StoreError> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::CompleteWithdrawal)?;

        let validator = state
            .validators
            .get_mut(&record.validator_id)
            .ok_or_else(|| StoreError::NotFound(format!("validator {}", record.validator_id)))?;
        validator.is_processing = false;

        let settlement = SettlementTransaction {
            id: state.settlements.len() as i64 + 1,
            from_public_key: record.from_public_key.clone(),
            to_public_key: record.to_public_key.clone(),
            receipt_id: record.receipt_id.clone(),
            amount: record.amount,
            validator_id: record.validator_id,
            created_at: Utc::now(),
        };
        state.settlements.push(settlement.clone());
        Ok(settlement)
    }

    async fn rollback_withdrawal(
        &self,
        public_key: &str,
        amount: i64,
    ) -> Result<Validator, StoreError> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::RollbackWithdrawal)?;

        let validator = state
            .by_key_mut(public_key)
            .ok_or_else(|| StoreError::NotFound(format!("validator {}", public_key)))?;
        validator.pending_payouts += amount;
        validator.is_processing = false;
        Ok(validator.clone())
    }

    async fn record_tick(&self, tick: &NewTick, reward: i64) -> Result<Tick, StoreError> {
        let mut state = self.state.write().await;
        state.take_fault(FaultPoint::RecordTick)?;

        let validator = state
            .validators
            .get_mut(&tick.validator_id)
            .ok_or_else(|| StoreError::NotFound(format!("validator {}", tick.validator_id)))?;
        validator.pending_payouts += reward;

        let record = Tick {
            id: state.ticks.len() as i64 + 1,
            target_id: tick.target_id,
            validator_id: tick.validator_id,
            status: tick.status,
            latency_ms: tick.latency_ms,
            location: tick.location.clone(),
            created_at: Utc::now(),
        };
        state.ticks.push(record.clone());
        Ok(record)
    }

    async fn enabled_targets(&self) -> Result<Vec<MonitorTarget>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .targets
            .values()
            .filter(|t| !t.disabled)
            .cloned()
            .collect())
    }

    async fn get_target(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError> {
        Ok(self.state.read().await.targets.get(&id).cloned())
    }

    async fn create_target(&self, target: &NewTarget) -> Result<MonitorTarget, StoreError> {
        let mut state = self.state.write().await;
        state.next_target_id += 1;
        let record = MonitorTarget {
            id: state.next_target_id,
            url: target.url.clone(),
            title: target.title.clone(),
            description: target.description.clone(),
            disabled: false,
            created_at: Utc::now(),
        };
        state.targets.insert(record.id, record.clone());
        Ok(record)
    }

    async fn disable_target(&self, id: i32) -> Result<Option<MonitorTarget>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.targets.get_mut(&id).map(|target| {
            target.disabled = true;
            target.clone()
        }))
    }

    async fn recent_ticks(&self, target_id: i32, limit: i64) -> Result<Vec<Tick>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .ticks
            .iter()
            .rev()
            .filter(|t| t.target_id == target_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn settlements_for(
        &self,
        validator_id: i32,
    ) -> Result<Vec<SettlementTransaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .settlements
            .iter()
            .rev()
            .filter(|s| s.validator_id == validator_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store_with_challenge(balance: i64) -> MemoryStore {
        let store = MemoryStore::default();
        store.seed_validator("pk1", balance).await;
        store
            .store_challenge("pk1", "challenge", Utc::now() + Duration::minutes(10))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_key() {
        let store = MemoryStore::default();
        let signup = ValidatorSignup {
            public_key: "pk1".to_string(),
            ip_address: "10.0.0.1".to_string(),
            location: "Ohio".to_string(),
        };
        let first = store.upsert_validator(&signup).await.unwrap();
        assert_eq!(first.pending_payouts, 0);

        let moved = ValidatorSignup {
            ip_address: "10.0.0.2".to_string(),
            location: "Oregon".to_string(),
            ..signup
        };
        let second = store.upsert_validator(&moved).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.location, "Oregon");
        assert_eq!(second.ip_address, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_begin_withdrawal_guards() {
        let store = store_with_challenge(100).await;

        let outcome = store
            .begin_withdrawal("pk1", "other", 10, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WithdrawalLock::ChallengeMismatch);

        let outcome = store
            .begin_withdrawal("pk1", "challenge", 101, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WithdrawalLock::InsufficientFunds { balance: 100 });

        let outcome = store
            .begin_withdrawal("pk1", "challenge", 40, Utc::now())
            .await
            .unwrap();
        match outcome {
            WithdrawalLock::Acquired(v) => {
                assert_eq!(v.pending_payouts, 60);
                assert!(v.is_processing);
                assert!(v.temp_signed_message.is_none());
            }
            other => panic!("expected lock, got {:?}", other),
        }

        let outcome = store
            .begin_withdrawal("pk1", "challenge", 10, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WithdrawalLock::AlreadyLocked);
    }

    #[tokio::test]
    async fn test_begin_withdrawal_rejects_expired_challenge() {
        let store = store_with_challenge(100).await;
        let later = Utc::now() + Duration::minutes(11);
        let outcome = store
            .begin_withdrawal("pk1", "challenge", 10, later)
            .await
            .unwrap();
        assert_eq!(outcome, WithdrawalLock::ChallengeExpired);
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = store_with_challenge(100).await;
        store.inject_fault(FaultPoint::RollbackWithdrawal).await;

        assert!(store.rollback_withdrawal("pk1", 1).await.is_err());
        assert!(store.rollback_withdrawal("pk1", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_tick_credits_validator() {
        let store = MemoryStore::default();
        let validator = store.seed_validator("pk1", 0).await;
        let target = store
            .create_target(&NewTarget {
                url: "https://example.com".to_string(),
                title: "example".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let tick = NewTick {
            target_id: target.id,
            validator_id: validator.id,
            status: TickStatus::Up,
            latency_ms: 42,
            location: "localhost".to_string(),
        };
        store.record_tick(&tick, 1000).await.unwrap();

        let validator = store.get_validator(validator.id).await.unwrap().unwrap();
        assert_eq!(validator.pending_payouts, 1000);
        assert_eq!(store.recent_ticks(target.id, 10).await.unwrap().len(), 1);
    }
}
