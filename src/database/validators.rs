//! Validator Repository - PostgreSQL operations for validators using sqlx

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use super::StoreError;
use super::models::{Validator, ValidatorSignup, WithdrawalLock};

const VALIDATOR_COLUMNS: &str = "id, public_key, location, ip_address, pending_payouts, \
     temp_signed_message, signed_message_expiry, is_processing, created_at";

pub struct ValidatorRepository {
    pool: PgPool,
}

impl ValidatorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i32) -> Result<Option<Validator>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM validators WHERE id = $1",
            VALIDATOR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to get validator: {}", e)))?;

        Ok(row.map(|row| map_validator(&row)))
    }

    pub async fn find_by_public_key(&self, public_key: &str) -> Result<Option<Validator>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM validators WHERE public_key = $1",
            VALIDATOR_COLUMNS
        ))
        .bind(public_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to find validator: {}", e)))?;

        Ok(row.map(|row| map_validator(&row)))
    }

    pub async fn upsert_signup(&self, signup: &ValidatorSignup) -> Result<Validator, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO validators (public_key, location, ip_address, pending_payouts)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (public_key) DO UPDATE SET
                location = EXCLUDED.location,
                ip_address = EXCLUDED.ip_address,
                updated_at = NOW()
            RETURNING {}
            "#,
            VALIDATOR_COLUMNS
        ))
        .bind(&signup.public_key)
        .bind(&signup.location)
        .bind(&signup.ip_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to upsert validator: {}", e)))?;

        let validator = map_validator(&row);
        debug!(validator_id = %validator.id, "Validator upserted");
        Ok(validator)
    }

    pub async fn store_challenge(
        &self,
        public_key: &str,
        message: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE validators
            SET temp_signed_message = $2, signed_message_expiry = $3, updated_at = NOW()
            WHERE public_key = $1
            "#,
        )
        .bind(public_key)
        .bind(message)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to store challenge: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    /// Single conditional UPDATE: the lock, the challenge clear and the debit
    /// land together or not at all.
    pub async fn try_lock_and_debit(
        &self,
        public_key: &str,
        challenge: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalLock, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE validators
            SET is_processing = TRUE,
                temp_signed_message = NULL,
                signed_message_expiry = NULL,
                pending_payouts = pending_payouts - $3,
                updated_at = NOW()
            WHERE public_key = $1
              AND is_processing = FALSE
              AND temp_signed_message = $2
              AND signed_message_expiry > $4
              AND pending_payouts >= $3
            RETURNING {}
            "#,
            VALIDATOR_COLUMNS
        ))
        .bind(public_key)
        .bind(challenge)
        .bind(amount)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock validator: {}", e)))?;

        if let Some(row) = row {
            return Ok(WithdrawalLock::Acquired(map_validator(&row)));
        }

        // Guard failed: classify from the current row
        let current = self.find_by_public_key(public_key).await?;
        Ok(classify_lock_failure(current.as_ref(), challenge, amount, now))
    }

    pub async fn clear_lock(&self, conn: &mut PgConnection, id: i32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE validators SET is_processing = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to clear lock: {}", e)))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::NotFound(format!("validator {}", id)));
        }
        Ok(())
    }

    pub async fn credit(
        &self,
        conn: &mut PgConnection,
        id: i32,
        amount: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE validators
            SET pending_payouts = pending_payouts + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to credit validator: {}", e)))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::NotFound(format!("validator {}", id)));
        }
        Ok(())
    }

    pub async fn recredit_and_unlock(
        &self,
        public_key: &str,
        amount: i64,
    ) -> Result<Validator, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE validators
            SET pending_payouts = pending_payouts + $2,
                is_processing = FALSE,
                updated_at = NOW()
            WHERE public_key = $1
            RETURNING {}
            "#,
            VALIDATOR_COLUMNS
        ))
        .bind(public_key)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to roll back withdrawal: {}", e)))?;

        row.map(|row| map_validator(&row))
            .ok_or_else(|| StoreError::NotFound(format!("validator {}", public_key)))
    }
}

fn map_validator(row: &PgRow) -> Validator {
    Validator {
        id: row.get("id"),
        public_key: row.get("public_key"),
        location: row.get("location"),
        ip_address: row.get("ip_address"),
        pending_payouts: row.get("pending_payouts"),
        temp_signed_message: row.get("temp_signed_message"),
        signed_message_expiry: row.get("signed_message_expiry"),
        is_processing: row.get("is_processing"),
        created_at: row.get("created_at"),
    }
}

/// Explain why the conditional lock update matched no row
pub(crate) fn classify_lock_failure(
    current: Option<&Validator>,
    challenge: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> WithdrawalLock {
    let Some(validator) = current else {
        return WithdrawalLock::NotFound;
    };

    if validator.is_processing {
        WithdrawalLock::AlreadyLocked
    } else if validator.temp_signed_message.as_deref() != Some(challenge) {
        WithdrawalLock::ChallengeMismatch
    } else if validator.signed_message_expiry.is_none_or(|expiry| expiry <= now) {
        WithdrawalLock::ChallengeExpired
    } else if validator.pending_payouts < amount {
        WithdrawalLock::InsufficientFunds {
            balance: validator.pending_payouts,
        }
    } else {
        // Row changed between the update and the read; report it as a lost race
        WithdrawalLock::AlreadyLocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn validator() -> Validator {
        Validator {
            id: 1,
            public_key: "pk".to_string(),
            location: "localhost".to_string(),
            ip_address: "127.0.0.1".to_string(),
            pending_payouts: 500,
            temp_signed_message: Some("msg".to_string()),
            signed_message_expiry: Some(Utc::now() + Duration::minutes(5)),
            is_processing: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_classify_lock_failure() {
        let now = Utc::now();
        assert_eq!(classify_lock_failure(None, "msg", 1, now), WithdrawalLock::NotFound);

        let mut locked = validator();
        locked.is_processing = true;
        assert_eq!(
            classify_lock_failure(Some(&locked), "msg", 1, now),
            WithdrawalLock::AlreadyLocked
        );

        assert_eq!(
            classify_lock_failure(Some(&validator()), "other", 1, now),
            WithdrawalLock::ChallengeMismatch
        );

        assert_eq!(
            classify_lock_failure(Some(&validator()), "msg", 1, now + Duration::minutes(6)),
            WithdrawalLock::ChallengeExpired
        );

        assert_eq!(
            classify_lock_failure(Some(&validator()), "msg", 501, now),
            WithdrawalLock::InsufficientFunds { balance: 500 }
        );
    }
}
