//! Uptime Validator Hub
//!
//! Coordinates a pool of untrusted validators that run uptime checks on
//! registered targets, credits them per accepted check, and settles their
//! accrued balance through an external transfer.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs          - Crate root with re-exports
//! ├── main.rs         - Server entrypoint
//! ├── config.rs       - Configuration management
//! ├── error.rs        - Settlement error taxonomy
//! ├── coordinator/    - Validator sessions and check fan-out
//! │   ├── registry.rs   - Connected sessions
//! │   ├── correlator.rs - Pending callbacks by token
//! │   ├── dispatcher.rs - Fixed-interval dispatch
//! │   ├── messages.rs   - Wire frames
//! │   └── location.rs   - Peer IP geolocation
//! ├── settlement/     - Withdrawals
//! │   ├── challenge.rs  - Challenge messages
//! │   ├── machine.rs    - Withdrawal state machine
//! │   ├── gateway.rs    - Transfer gateway + in-memory ledger
//! │   └── relayer.rs    - HTTP transfer relayer
//! ├── crypto/         - Ed25519 verification
//! ├── api/            - HTTP endpoints and middleware
//! └── database/       - PostgreSQL and in-memory persistence
//! ```

pub mod api;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod database;
pub mod error;
pub mod settlement;

// Re-export main types for convenience
pub use config::HubConfig;
pub use coordinator::{
    CallbackCorrelator, Coordinator, CoordinatorStats, IngestOutcome, TaskDispatcher,
    ValidatorRegistry,
};
pub use crypto::SignatureVerifier;
pub use database::{DatabasePool, MemoryStore, PersistenceGateway, StoreError};
pub use error::{AuthFailure, SettlementError};
pub use settlement::{
    HttpTransferGateway, InMemoryLedgerGateway, TransferError, TransferGateway,
    WithdrawalStateMachine,
};
