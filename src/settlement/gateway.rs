//! Transfer gateway contract and the in-memory ledger implementation
//!
//! The gateway executes an irreversible value transfer from the hub treasury
//! to a validator. Any internal retry policy belongs to the gateway; callers
//! treat a returned error as final. Only `Unconfirmed` leaves open whether
//! money moved.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("insufficient treasury funds: have {available}, need {requested}")]
    InsufficientFunds { available: u128, requested: u128 },
    #[error("transfer rejected: {0}")]
    Rejected(String),
    #[error("settlement network unavailable: {0}")]
    Unavailable(String),
    /// The request may have been executed; only an operator can tell
    #[error("transfer outcome unknown: {0}")]
    Unconfirmed(String),
}

impl TransferError {
    /// False when funds may already have left the treasury
    pub fn is_definite_failure(&self) -> bool {
        !matches!(self, TransferError::Unconfirmed(_))
    }
}

/// Proof of a confirmed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Network transaction identifier (signature / transfer id)
    pub receipt_id: String,
    /// Sending account, recorded on the settlement row
    pub sender: String,
}

#[async_trait]
pub trait TransferGateway: Send + Sync {
    async fn transfer(&self, recipient: &str, amount: u64) -> Result<TransferReceipt, TransferError>;
}

#[derive(Debug, Clone)]
struct AccountSnapshot {
    balance: u128,
}

#[derive(Debug, Clone)]
struct TransferSnapshot {
    credit_account_id: u128,
    amount: u128,
}

#[derive(Debug, Default)]
struct InMemoryLedger {
    treasury_balance: u128,
    accounts: HashMap<u128, AccountSnapshot>,
    transfers: HashMap<u128, TransferSnapshot>,
}

/// Double-entry ledger kept in process memory (dev mode).
///
/// The treasury starts with a fixed float; a transfer larger than what is
/// left fails with `InsufficientFunds` and moves nothing.
pub struct InMemoryLedgerGateway {
    treasury: String,
    ledger: RwLock<InMemoryLedger>,
}

impl InMemoryLedgerGateway {
    pub fn new(treasury: impl Into<String>, float: u128) -> Self {
        let treasury = treasury.into();
        info!(treasury = %treasury, float = %float, "In-memory ledger initialized (dev mode)");
        Self {
            treasury,
            ledger: RwLock::new(InMemoryLedger {
                treasury_balance: float,
                ..Default::default()
            }),
        }
    }

    pub async fn treasury_balance(&self) -> u128 {
        self.ledger.read().await.treasury_balance
    }

    pub async fn balance_of(&self, recipient: &str) -> u128 {
        let ledger = self.ledger.read().await;
        ledger
            .accounts
            .get(&compute_account_id(recipient))
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    pub async fn transfer_count(&self) -> usize {
        self.ledger.read().await.transfers.len()
    }

    /// Sum of all transfers posted to `recipient`
    pub async fn transferred_to(&self, recipient: &str) -> u128 {
        let account_id = compute_account_id(recipient);
        let ledger = self.ledger.read().await;
        ledger
            .transfers
            .values()
            .filter(|t| t.credit_account_id == account_id)
            .map(|t| t.amount)
            .sum()
    }
}

#[async_trait]
impl TransferGateway for InMemoryLedgerGateway {
    async fn transfer(&self, recipient: &str, amount: u64) -> Result<TransferReceipt, TransferError> {
        if recipient.is_empty() {
            return Err(TransferError::InvalidRecipient("empty recipient".to_string()));
        }

        let amount = amount as u128;
        let mut ledger = self.ledger.write().await;

        if ledger.treasury_balance < amount {
            return Err(TransferError::InsufficientFunds {
                available: ledger.treasury_balance,
                requested: amount,
            });
        }

        let account_id = compute_account_id(recipient);
        let transfer_id = Uuid::now_v7().as_u128();

        ledger.treasury_balance -= amount;
        let account = ledger
            .accounts
            .entry(account_id)
            .or_insert(AccountSnapshot { balance: 0 });
        account.balance += amount;

        ledger.transfers.insert(
            transfer_id,
            TransferSnapshot {
                credit_account_id: account_id,
                amount,
            },
        );

        debug!(
            recipient = %recipient,
            amount = %amount,
            transfer_id = %format!("{:032x}", transfer_id),
            "In-memory transfer posted"
        );

        Ok(TransferReceipt {
            receipt_id: format!("{:032x}", transfer_id),
            sender: self.treasury.clone(),
        })
    }
}

fn compute_account_id(public_key: &str) -> u128 {
    let hash = Sha256::digest(public_key.as_bytes());
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&hash[..16]);
    u128::from_le_bytes(id_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let gateway = InMemoryLedgerGateway::new("treasury", 10_000);
        let receipt = gateway.transfer("validator-a", 3_000).await.unwrap();

        assert_eq!(receipt.sender, "treasury");
        assert_eq!(receipt.receipt_id.len(), 32);
        assert_eq!(gateway.treasury_balance().await, 7_000);
        assert_eq!(gateway.balance_of("validator-a").await, 3_000);
        assert_eq!(gateway.transfer_count().await, 1);

        gateway.transfer("validator-a", 500).await.unwrap();
        assert_eq!(gateway.transferred_to("validator-a").await, 3_500);
    }

    #[tokio::test]
    async fn test_insufficient_treasury_moves_nothing() {
        let gateway = InMemoryLedgerGateway::new("treasury", 100);
        let err = gateway.transfer("validator-a", 101).await.unwrap_err();

        assert_eq!(
            err,
            TransferError::InsufficientFunds {
                available: 100,
                requested: 101
            }
        );
        assert_eq!(gateway.treasury_balance().await, 100);
        assert_eq!(gateway.transfer_count().await, 0);
    }

    #[test]
    fn test_account_ids_are_stable() {
        assert_eq!(compute_account_id("abc"), compute_account_id("abc"));
        assert_ne!(compute_account_id("abc"), compute_account_id("abd"));
    }
}
