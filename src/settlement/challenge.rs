//! Withdrawal challenge messages
//!
//! A challenge is a one-time message the validator signs client-side to
//! prove it controls the key it wants to be paid to.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::database::Validator;

/// Default lifetime of an issued challenge
pub const DEFAULT_CHALLENGE_TTL_SECS: i64 = 600;

/// An issued withdrawal challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalChallenge {
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

impl WithdrawalChallenge {
    /// Build a fresh challenge for `public_key` issued at `now`
    pub fn issue(public_key: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            message: challenge_message(public_key, now.timestamp_millis(), &random_nonce()),
            expires_at: now + ttl,
        }
    }

    /// The challenge outstanding on `validator`, if any. A message stored
    /// without an expiry counts as already expired.
    pub fn stored(validator: &Validator) -> Option<Self> {
        let message = validator.temp_signed_message.clone()?;
        Some(Self {
            message,
            expires_at: validator
                .signed_message_expiry
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// `"Withdraw request for <pk> at <unix-ms> with nonce <nonce>"`
pub fn challenge_message(public_key: &str, unix_ms: i64, nonce: &str) -> String {
    format!("Withdraw request for {} at {} with nonce {}", public_key, unix_ms, nonce)
}

/// 16 random bytes, hex encoded (32 chars)
fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
