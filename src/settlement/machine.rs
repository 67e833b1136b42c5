//! Withdrawal state machine
//!
//! ```text
//! NoChallenge -> ChallengeIssued -> Locked -> Settling -> Completed
//!                                                     \-> RolledBack
//!                                                     \-> ManualReconciliationRequired
//! ```
//!
//! The lock, challenge consumption and debit happen in one conditional
//! write (`PersistenceGateway::begin_withdrawal`), so two concurrent
//! submissions for the same account can never both reach `Settling`.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::challenge::WithdrawalChallenge;
use super::gateway::{TransferError, TransferGateway};
use crate::crypto::{SignatureVerifier, WireSignature, parse_public_key};
use crate::database::{
    NewSettlement, PersistenceGateway, SettlementTransaction, Validator, WithdrawalLock,
};
use crate::error::{AuthFailure, SettlementError};

/// Observable withdrawal states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WithdrawalState {
    NoChallenge,
    ChallengeIssued,
    Locked,
    Settling,
    Completed,
    RolledBack,
    ManualReconciliationRequired,
}

impl WithdrawalState {
    /// Derive the resting state of an account from its stored row
    pub fn of(validator: &Validator) -> Self {
        if validator.is_processing {
            WithdrawalState::Locked
        } else if validator.temp_signed_message.is_some() {
            WithdrawalState::ChallengeIssued
        } else {
            WithdrawalState::NoChallenge
        }
    }
}

/// A signed withdrawal submission
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub public_key: String,
    pub amount: i64,
    pub signed_message: String,
    pub signature: WireSignature,
}

/// Successful settlement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub state: WithdrawalState,
    pub transaction: SettlementTransaction,
    pub remaining_balance: u64,
}

pub struct WithdrawalStateMachine {
    store: Arc<dyn PersistenceGateway>,
    gateway: Arc<dyn TransferGateway>,
    challenge_ttl: Duration,
}

impl WithdrawalStateMachine {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        gateway: Arc<dyn TransferGateway>,
        challenge_ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            challenge_ttl,
        }
    }

    /// Current unsettled balance of `public_key`
    pub async fn balance(&self, public_key: &str) -> Result<u64, SettlementError> {
        let validator = self.existing_validator(public_key).await?;
        Ok(to_amount(validator.pending_payouts))
    }

    /// Issue a fresh challenge, replacing any outstanding one
    pub async fn issue_challenge(
        &self,
        public_key: &str,
    ) -> Result<WithdrawalChallenge, SettlementError> {
        ensure_well_formed(public_key)?;

        let challenge = WithdrawalChallenge::issue(public_key, Utc::now(), self.challenge_ttl);
        let stored = self
            .store
            .store_challenge(public_key, &challenge.message, challenge.expires_at)
            .await?;

        if !stored {
            return Err(SettlementError::NotFound("Validator not found".to_string()));
        }

        info!(public_key = %public_key, expires_at = %challenge.expires_at, "Withdrawal challenge issued");
        Ok(challenge)
    }

    /// Verify, lock, debit, transfer and record a withdrawal
    pub async fn withdraw(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, SettlementError> {
        if request.amount <= 0 {
            return Err(SettlementError::Validation(
                "Amount must be a positive integer".to_string(),
            ));
        }
        let amount = request.amount;
        let public_key = request.public_key.as_str();
        let storage_failure = |source| SettlementError::WithdrawalStorage {
            public_key: public_key.to_string(),
            amount: to_amount(amount),
            source,
        };

        ensure_well_formed(public_key)?;
        let validator = self
            .store
            .find_validator(public_key)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| SettlementError::NotFound("Validator not found".to_string()))?;
        let now = Utc::now();

        if validator.is_processing {
            return Err(SettlementError::Conflict(
                "A withdrawal is already processing for this account".to_string(),
            ));
        }
        let challenge =
            WithdrawalChallenge::stored(&validator).ok_or(AuthFailure::ChallengeMissing)?;
        if challenge.is_expired_at(now) {
            return Err(AuthFailure::ChallengeExpired.into());
        }
        if challenge.message != request.signed_message {
            return Err(AuthFailure::ChallengeMismatch.into());
        }
        if !SignatureVerifier::verify_encoded(&request.signed_message, public_key, &request.signature)
        {
            warn!(public_key = %public_key, "Withdrawal rejected: signature did not verify");
            return Err(AuthFailure::InvalidSignature.into());
        }
        if validator.pending_payouts < amount {
            return Err(SettlementError::InsufficientBalance {
                balance: to_amount(validator.pending_payouts),
                requested: to_amount(amount),
            });
        }

        // Locked: the write re-checks every guard above against the current row
        let locked = match self
            .store
            .begin_withdrawal(public_key, &request.signed_message, amount, now)
            .await
            .map_err(storage_failure)?
        {
            WithdrawalLock::Acquired(row) => row,
            WithdrawalLock::NotFound => {
                return Err(SettlementError::NotFound("Validator not found".to_string()));
            }
            WithdrawalLock::AlreadyLocked => {
                return Err(SettlementError::Conflict(
                    "A withdrawal is already processing for this account".to_string(),
                ));
            }
            WithdrawalLock::InsufficientFunds { balance } => {
                return Err(SettlementError::InsufficientBalance {
                    balance: to_amount(balance),
                    requested: to_amount(amount),
                });
            }
            WithdrawalLock::ChallengeMismatch => {
                return Err(AuthFailure::ChallengeMismatch.into());
            }
            WithdrawalLock::ChallengeExpired => {
                return Err(AuthFailure::ChallengeExpired.into());
            }
        };

        info!(
            validator_id = %locked.id,
            amount = %amount,
            remaining = %locked.pending_payouts,
            state = ?WithdrawalState::Settling,
            "Withdrawal locked, settling"
        );

        let receipt = match self.gateway.transfer(public_key, to_amount(amount)).await {
            Ok(receipt) => receipt,
            Err(cause) if cause.is_definite_failure() => {
                return Err(self.roll_back(public_key, amount, cause).await);
            }
            Err(cause) => {
                error!(
                    public_key = %public_key,
                    amount = %amount,
                    error = %cause,
                    state = ?WithdrawalState::ManualReconciliationRequired,
                    "CRITICAL: transfer outcome unknown; balance held and account left locked"
                );
                return Err(SettlementError::TransferUnconfirmed {
                    public_key: public_key.to_string(),
                    amount: to_amount(amount),
                    source: cause,
                });
            }
        };

        let record = NewSettlement {
            from_public_key: receipt.sender.clone(),
            to_public_key: public_key.to_string(),
            receipt_id: receipt.receipt_id.clone(),
            amount,
            validator_id: locked.id,
        };

        match self.store.complete_withdrawal(&record).await {
            Ok(transaction) => {
                info!(
                    validator_id = %locked.id,
                    amount = %amount,
                    receipt = %transaction.receipt_id,
                    "Withdrawal completed"
                );
                Ok(WithdrawalReceipt {
                    state: WithdrawalState::Completed,
                    transaction,
                    remaining_balance: to_amount(locked.pending_payouts),
                })
            }
            Err(e) => {
                error!(
                    public_key = %public_key,
                    amount = %amount,
                    receipt = %receipt.receipt_id,
                    error = %e,
                    state = ?WithdrawalState::ManualReconciliationRequired,
                    "CRITICAL: transfer confirmed but settlement record failed; account left locked"
                );
                Err(SettlementError::RecordFailed {
                    public_key: public_key.to_string(),
                    amount: to_amount(amount),
                    receipt_id: receipt.receipt_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Settlement history of `public_key`, newest first
    pub async fn history(
        &self,
        public_key: &str,
    ) -> Result<Vec<SettlementTransaction>, SettlementError> {
        let validator = self.existing_validator(public_key).await?;
        Ok(self.store.settlements_for(validator.id).await?)
    }

    async fn roll_back(&self, public_key: &str, amount: i64, cause: TransferError) -> SettlementError {
        warn!(public_key = %public_key, amount = %amount, error = %cause, "Transfer failed, rolling back");

        match self.store.rollback_withdrawal(public_key, amount).await {
            Ok(restored) => {
                info!(
                    validator_id = %restored.id,
                    balance = %restored.pending_payouts,
                    state = ?WithdrawalState::RolledBack,
                    "Withdrawal rolled back"
                );
                SettlementError::Transfer {
                    public_key: public_key.to_string(),
                    amount: to_amount(amount),
                    source: cause,
                }
            }
            Err(e) => {
                error!(
                    public_key = %public_key,
                    amount = %amount,
                    transfer_error = %cause,
                    error = %e,
                    state = ?WithdrawalState::ManualReconciliationRequired,
                    "CRITICAL: transfer failed and balance restore failed; manual reconciliation required"
                );
                SettlementError::CriticalReconciliation {
                    public_key: public_key.to_string(),
                    amount: to_amount(amount),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn existing_validator(&self, public_key: &str) -> Result<Validator, SettlementError> {
        ensure_well_formed(public_key)?;
        self.store
            .find_validator(public_key)
            .await?
            .ok_or_else(|| SettlementError::NotFound("Validator not found".to_string()))
    }
}

fn ensure_well_formed(public_key: &str) -> Result<(), SettlementError> {
    parse_public_key(public_key)
        .map(|_| ())
        .map_err(|e| SettlementError::Validation(format!("Invalid public key: {}", e)))
}

fn to_amount(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encode_public_key;
    use crate::database::{FaultPoint, MemoryStore};
    use crate::settlement::gateway::{TransferError, TransferReceipt};
    use async_trait::async_trait;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGateway {
        failure: Option<TransferError>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn with(failure: Option<TransferError>) -> Self {
            Self {
                failure,
                calls: AtomicUsize::new(0),
            }
        }

        fn succeeding() -> Self {
            Self::with(None)
        }

        fn failing() -> Self {
            Self::with(Some(TransferError::Unavailable("scripted failure".to_string())))
        }

        fn unconfirmed() -> Self {
            Self::with(Some(TransferError::Unconfirmed(
                "200 without a transaction signature".to_string(),
            )))
        }
    }

    #[async_trait]
    impl TransferGateway for ScriptedGateway {
        async fn transfer(
            &self,
            _recipient: &str,
            _amount: u64,
        ) -> Result<TransferReceipt, TransferError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            Ok(TransferReceipt {
                receipt_id: format!("receipt-{}", n),
                sender: "treasury".to_string(),
            })
        }
    }

    async fn setup(
        gateway: Arc<ScriptedGateway>,
        balance: i64,
    ) -> (Arc<MemoryStore>, WithdrawalStateMachine, SigningKey, String) {
        let store = Arc::new(MemoryStore::new());
        let key = SigningKey::generate(&mut OsRng);
        let public_key = encode_public_key(&key.verifying_key());
        store.seed_validator(&public_key, balance).await;
        let machine = WithdrawalStateMachine::new(store.clone(), gateway, Duration::seconds(600));
        (store, machine, key, public_key)
    }

    fn signed(key: &SigningKey, public_key: &str, message: &str, amount: i64) -> WithdrawalRequest {
        let signature = key.sign(message.as_bytes());
        WithdrawalRequest {
            public_key: public_key.to_string(),
            amount,
            signed_message: message.to_string(),
            signature: WireSignature::Buffer {
                data: signature.to_bytes().to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn test_completed_withdrawal() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (store, machine, key, pk) = setup(gateway.clone(), 5000).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let receipt = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 3000))
            .await
            .unwrap();

        assert_eq!(receipt.state, WithdrawalState::Completed);
        assert_eq!(receipt.remaining_balance, 2000);
        assert_eq!(machine.balance(&pk).await.unwrap(), 2000);
        assert_eq!(store.settlements().await.len(), 1);

        let row = store.find_validator(&pk).await.unwrap().unwrap();
        assert_eq!(WithdrawalState::of(&row), WithdrawalState::NoChallenge);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_lookup() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (_store, machine, key, pk) = setup(gateway.clone(), 5000).await;

        let err = machine.withdraw(&signed(&key, &pk, "x", 0)).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        let err = machine
            .withdraw(&signed(&key, "not-base58-0OIl", "x", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        let stranger = encode_public_key(&SigningKey::generate(&mut OsRng).verifying_key());
        let err = machine.balance(&stranger).await.unwrap_err();
        assert!(matches!(err, SettlementError::NotFound(_)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_challenge() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (_store, machine, key, pk) = setup(gateway, 5000).await;

        let err = machine
            .withdraw(&signed(&key, &pk, "anything", 100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Authentication(AuthFailure::ChallengeMissing)
        ));
    }

    #[tokio::test]
    async fn test_wrong_signer_rejected() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (_store, machine, _key, pk) = setup(gateway.clone(), 5000).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let intruder = SigningKey::generate(&mut OsRng);
        let err = machine
            .withdraw(&signed(&intruder, &pk, &challenge.message, 100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SettlementError::Authentication(AuthFailure::InvalidSignature)
        ));
        assert_eq!(machine.balance(&pk).await.unwrap(), 5000);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overdraw_rejected_before_debit() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (store, machine, key, pk) = setup(gateway.clone(), 500).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let err = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 501))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SettlementError::InsufficientBalance {
                balance: 500,
                requested: 501
            }
        ));
        let row = store.find_validator(&pk).await.unwrap().unwrap();
        assert_eq!(row.pending_payouts, 500);
        assert!(!row.is_processing);
        // Challenge survives a rejected submission
        assert_eq!(WithdrawalState::of(&row), WithdrawalState::ChallengeIssued);
    }

    #[tokio::test]
    async fn test_transfer_failure_rolls_back() {
        let gateway = Arc::new(ScriptedGateway::failing());
        let (store, machine, key, pk) = setup(gateway, 5000).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let err = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 3000))
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::Transfer { amount: 3000, .. }));
        assert_eq!(err.terminal_state(), Some(WithdrawalState::RolledBack));
        let row = store.find_validator(&pk).await.unwrap().unwrap();
        assert_eq!(row.pending_payouts, 5000);
        assert!(!row.is_processing);
        assert!(store.settlements().await.is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_transfer_holds_debit_and_lock() {
        let gateway = Arc::new(ScriptedGateway::unconfirmed());
        let (store, machine, key, pk) = setup(gateway.clone(), 5000).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let err = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 3000))
            .await
            .unwrap_err();

        match &err {
            SettlementError::TransferUnconfirmed {
                public_key, amount, ..
            } => {
                assert_eq!(public_key, &pk);
                assert_eq!(*amount, 3000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.requires_manual_reconciliation());

        let row = store.find_validator(&pk).await.unwrap().unwrap();
        assert_eq!(row.pending_payouts, 2000);
        assert!(row.is_processing);
        assert!(store.settlements().await.is_empty());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_carries_account() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (store, machine, key, pk) = setup(gateway.clone(), 5000).await;
        let challenge = machine.issue_challenge(&pk).await.unwrap();
        store.inject_fault(FaultPoint::BeginWithdrawal).await;

        let err = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 1200))
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::WithdrawalStorage { .. }));
        assert_eq!(err.account(), Some((pk.as_str(), 1200)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_history_lists_settlements() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (_store, machine, key, pk) = setup(gateway, 5000).await;

        for amount in [1000, 500] {
            let challenge = machine.issue_challenge(&pk).await.unwrap();
            machine
                .withdraw(&signed(&key, &pk, &challenge.message, amount))
                .await
                .unwrap();
        }

        let history = machine.history(&pk).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, 500);
        assert_eq!(history[1].amount, 1000);
    }

    #[tokio::test]
    async fn test_failed_rollback_leaves_account_locked() {
        let gateway = Arc::new(ScriptedGateway::failing());
        let (store, machine, key, pk) = setup(gateway, 5000).await;
        store.inject_fault(FaultPoint::RollbackWithdrawal).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let err = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 3000))
            .await
            .unwrap_err();

        match err {
            SettlementError::CriticalReconciliation {
                public_key, amount, ..
            } => {
                assert_eq!(public_key, pk);
                assert_eq!(amount, 3000);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let row = store.find_validator(&pk).await.unwrap().unwrap();
        assert_eq!(row.pending_payouts, 2000);
        assert!(row.is_processing);
    }

    #[tokio::test]
    async fn test_record_failure_keeps_receipt() {
        let gateway = Arc::new(ScriptedGateway::succeeding());
        let (store, machine, key, pk) = setup(gateway, 5000).await;
        store.inject_fault(FaultPoint::CompleteWithdrawal).await;

        let challenge = machine.issue_challenge(&pk).await.unwrap();
        let err = machine
            .withdraw(&signed(&key, &pk, &challenge.message, 1000))
            .await
            .unwrap_err();

        match err {
            SettlementError::RecordFailed { receipt_id, .. } => assert_eq!(receipt_id, "receipt-0"),
            other => panic!("unexpected error: {other:?}"),
        }

        let row = store.find_validator(&pk).await.unwrap().unwrap();
        assert!(row.is_processing);
        assert_eq!(row.pending_payouts, 4000);

        // Locked account refuses further withdrawals
        let retry = machine.issue_challenge(&pk).await.unwrap();
        let err = machine
            .withdraw(&signed(&key, &pk, &retry.message, 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Conflict(_)));
    }
}
