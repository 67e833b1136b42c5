//! Settlement of accrued validator credit
//!
//! - `challenge` - one-time withdrawal challenge messages
//! - `machine` - the withdrawal state machine (lock, debit, transfer, reconcile)
//! - `gateway` - transfer gateway contract and in-memory ledger
//! - `relayer` - HTTP transfer relayer client

pub mod challenge;
pub mod gateway;
pub mod machine;
pub mod relayer;

pub use challenge::{DEFAULT_CHALLENGE_TTL_SECS, WithdrawalChallenge};
pub use gateway::{InMemoryLedgerGateway, TransferError, TransferGateway, TransferReceipt};
pub use machine::{WithdrawalReceipt, WithdrawalRequest, WithdrawalState, WithdrawalStateMachine};
pub use relayer::{HttpTransferGateway, RelayerConfig};
