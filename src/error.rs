//! Settlement error taxonomy
//!
//! Every withdrawal path ends in either a success or one of these variants.
//! The HTTP layer maps each to a status code and a `{success: false, ...}`
//! envelope (see `api::payout`).

use thiserror::Error;

use crate::database::StoreError;
use crate::settlement::{TransferError, WithdrawalState};

/// Why a challenge-response check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("No withdrawal challenge found. Request a new message first")]
    ChallengeMissing,
    #[error("Withdrawal challenge has expired. Request a new message")]
    ChallengeExpired,
    #[error("Signed message does not match the issued challenge")]
    ChallengeMismatch,
    #[error("Invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("{0}")]
    Validation(String),

    #[error("Insufficient balance: have {balance}, requested {requested}")]
    InsufficientBalance { balance: u64, requested: u64 },

    #[error("{0}")]
    Authentication(#[from] AuthFailure),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage failure: {0}")]
    Persistence(#[from] StoreError),

    /// Storage failed while a withdrawal was being processed
    #[error("Storage failure while withdrawing {amount} for {public_key}: {source}")]
    WithdrawalStorage {
        public_key: String,
        amount: u64,
        source: StoreError,
    },

    /// Transfer definitely did not happen and the debit was rolled back
    #[error("Transfer of {amount} to {public_key} failed, balance restored: {source}")]
    Transfer {
        public_key: String,
        amount: u64,
        source: TransferError,
    },

    /// Transfer may have been paid out; debit and lock are kept
    #[error("Transfer of {amount} to {public_key} has an unknown outcome: {source}")]
    TransferUnconfirmed {
        public_key: String,
        amount: u64,
        source: TransferError,
    },

    /// Transfer confirmed but the settlement record could not be written
    #[error("Transfer {receipt_id} of {amount} to {public_key} succeeded but could not be recorded: {reason}")]
    RecordFailed {
        public_key: String,
        amount: u64,
        receipt_id: String,
        reason: String,
    },

    /// Transfer failed and the re-credit failed too; balance stays debited
    #[error("Transfer failed and balance could not be restored for {public_key}: {reason}")]
    CriticalReconciliation {
        public_key: String,
        amount: u64,
        reason: String,
    },
}

impl SettlementError {
    /// True when an operator has to look at the account before it is usable again
    pub fn requires_manual_reconciliation(&self) -> bool {
        matches!(
            self,
            SettlementError::Transfer { .. }
                | SettlementError::TransferUnconfirmed { .. }
                | SettlementError::RecordFailed { .. }
                | SettlementError::CriticalReconciliation { .. }
        )
    }

    /// Account and amount a failed withdrawal was for
    pub fn account(&self) -> Option<(&str, u64)> {
        match self {
            SettlementError::WithdrawalStorage {
                public_key, amount, ..
            }
            | SettlementError::Transfer {
                public_key, amount, ..
            }
            | SettlementError::TransferUnconfirmed {
                public_key, amount, ..
            }
            | SettlementError::RecordFailed {
                public_key, amount, ..
            }
            | SettlementError::CriticalReconciliation {
                public_key, amount, ..
            } => Some((public_key.as_str(), *amount)),
            _ => None,
        }
    }

    /// Terminal state reached by a withdrawal that got past the lock
    pub fn terminal_state(&self) -> Option<WithdrawalState> {
        match self {
            SettlementError::Transfer { .. } => Some(WithdrawalState::RolledBack),
            SettlementError::TransferUnconfirmed { .. }
            | SettlementError::RecordFailed { .. }
            | SettlementError::CriticalReconciliation { .. } => {
                Some(WithdrawalState::ManualReconciliationRequired)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = SettlementError::from(AuthFailure::ChallengeExpired);
        assert!(err.to_string().contains("expired"));

        let err = SettlementError::InsufficientBalance {
            balance: 10,
            requested: 20,
        };
        assert_eq!(err.to_string(), "Insufficient balance: have 10, requested 20");
    }

    #[test]
    fn test_reconciliation_flag() {
        let rolled_back = SettlementError::Transfer {
            public_key: "pk".into(),
            amount: 5,
            source: TransferError::Unavailable("down".into()),
        };
        assert!(rolled_back.requires_manual_reconciliation());
        assert_eq!(rolled_back.terminal_state(), Some(WithdrawalState::RolledBack));

        let unconfirmed = SettlementError::TransferUnconfirmed {
            public_key: "pk".into(),
            amount: 5,
            source: TransferError::Unconfirmed("timed out".into()),
        };
        assert_eq!(unconfirmed.account(), Some(("pk", 5)));
        assert_eq!(
            unconfirmed.terminal_state(),
            Some(WithdrawalState::ManualReconciliationRequired)
        );

        assert!(!SettlementError::Conflict("busy".into()).requires_manual_reconciliation());
        assert!(
            !SettlementError::Authentication(AuthFailure::InvalidSignature)
                .requires_manual_reconciliation()
        );
        assert_eq!(SettlementError::Conflict("busy".into()).account(), None);
    }
}
