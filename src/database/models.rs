//! Persistent records shared by the coordinator and settlement paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered validator and its ledger account.
///
/// `pending_payouts` is the accrued, unsettled balance in the smallest
/// currency unit and never goes below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    pub id: i32,
    pub public_key: String,
    pub location: String,
    pub ip_address: String,
    pub pending_payouts: i64,
    pub temp_signed_message: Option<String>,
    pub signed_message_expiry: Option<DateTime<Utc>>,
    pub is_processing: bool,
    pub created_at: DateTime<Utc>,
}

/// Network details captured on a verified signup
#[derive(Debug, Clone)]
pub struct ValidatorSignup {
    pub public_key: String,
    pub ip_address: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTarget {
    pub id: i32,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTarget {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
}

/// Outcome reported by a validator for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickStatus {
    /// Target reachable
    Up,
    /// Target answered with a failure status
    Down,
    Unknown,
    /// Network-level failure (DNS, refused, unreachable host)
    Unreachable,
    Timeout,
    Error,
}

impl TickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickStatus::Up => "up",
            TickStatus::Down => "down",
            TickStatus::Unknown => "unknown",
            TickStatus::Unreachable => "unreachable",
            TickStatus::Timeout => "timeout",
            TickStatus::Error => "error",
        }
    }
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TickStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(TickStatus::Up),
            "down" => Ok(TickStatus::Down),
            "unknown" => Ok(TickStatus::Unknown),
            "unreachable" => Ok(TickStatus::Unreachable),
            "timeout" => Ok(TickStatus::Timeout),
            "error" => Ok(TickStatus::Error),
            other => Err(format!("Unknown tick status: {}", other)),
        }
    }
}

/// One observation of a target, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub id: i64,
    pub target_id: i32,
    pub validator_id: i32,
    pub status: TickStatus,
    pub latency_ms: i32,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTick {
    pub target_id: i32,
    pub validator_id: i32,
    pub status: TickStatus,
    pub latency_ms: i32,
    pub location: String,
}

/// A confirmed payout, written only after the transfer succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTransaction {
    pub id: i64,
    pub from_public_key: String,
    pub to_public_key: String,
    pub receipt_id: String,
    pub amount: i64,
    pub validator_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub from_public_key: String,
    pub to_public_key: String,
    pub receipt_id: String,
    pub amount: i64,
    pub validator_id: i32,
}

/// Result of the conditional lock-and-debit write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalLock {
    /// Lock set, challenge cleared and balance debited; holds the updated row
    Acquired(Validator),
    NotFound,
    AlreadyLocked,
    InsufficientFunds { balance: i64 },
    /// Stored challenge no longer matches (consumed or replaced)
    ChallengeMismatch,
    ChallengeExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_status_wire_names() {
        for status in [
            TickStatus::Up,
            TickStatus::Down,
            TickStatus::Unknown,
            TickStatus::Unreachable,
            TickStatus::Timeout,
            TickStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<TickStatus>().unwrap(), status);
        }
        assert!("reachable".parse::<TickStatus>().is_err());
    }
}
