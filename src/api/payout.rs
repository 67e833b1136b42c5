//! Payout API endpoints
//!
//! Endpoints:
//!   GET /balance/{public_key} -> Unsettled balance of a validator
//!   GET /getMessage/{public_key} -> Issue a withdrawal challenge
//!   POST /withdraw -> Submit a signed withdrawal
//!   GET /settlements/{public_key} -> Completed payouts, newest first

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::error;

use crate::crypto::WireSignature;
use crate::database::SettlementTransaction;
use crate::error::{AuthFailure, SettlementError};
use crate::settlement::{WithdrawalRequest, WithdrawalStateMachine};

#[derive(Clone)]
pub struct PayoutApiState {
    pub machine: Arc<WithdrawalStateMachine>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceData {
    pub public_key: String,
    pub balance: u64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub success: bool,
    pub data: BalanceData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub success: bool,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Raw withdrawal body; every field is checked before it reaches the state machine
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawBody {
    pub public_key: Option<String>,
    pub amount: Option<Value>,
    pub signed_message: Option<String>,
    pub signature: Option<WireSignature>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawData {
    pub remaining_balance: u64,
    pub transaction: SettlementTransaction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub success: bool,
    pub data: WithdrawData,
    pub transaction_signature: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SettlementsResponse {
    pub success: bool,
    pub count: usize,
    pub data: Vec<SettlementTransaction>,
}

impl WithdrawBody {
    fn into_request(self) -> Result<WithdrawalRequest, SettlementError> {
        let public_key = self
            .public_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SettlementError::Validation("No public key provided".to_string()))?;

        let amount = self
            .amount
            .as_ref()
            .and_then(parse_amount)
            .filter(|a| *a > 0)
            .ok_or_else(|| SettlementError::Validation("Invalid amount provided".to_string()))?;

        let (signed_message, signature) = match (self.signed_message, self.signature) {
            (Some(message), Some(signature)) if !message.is_empty() && !signature.is_empty() => {
                (message, signature)
            }
            _ => {
                return Err(SettlementError::Validation(
                    "No signed message or signature provided".to_string(),
                ));
            }
        };

        Ok(WithdrawalRequest {
            public_key: public_key.trim().to_string(),
            amount,
            signed_message,
            signature,
        })
    }
}

/// Integer amount from a JSON number or a numeric string
fn parse_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let status = match &self {
            SettlementError::Authentication(AuthFailure::InvalidSignature) => StatusCode::UNAUTHORIZED,
            SettlementError::Validation(_)
            | SettlementError::InsufficientBalance { .. }
            | SettlementError::Authentication(_) => StatusCode::BAD_REQUEST,
            SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
            SettlementError::Conflict(_) => StatusCode::CONFLICT,
            SettlementError::Persistence(_)
            | SettlementError::WithdrawalStorage { .. }
            | SettlementError::Transfer { .. }
            | SettlementError::TransferUnconfirmed { .. }
            | SettlementError::RecordFailed { .. }
            | SettlementError::CriticalReconciliation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            SettlementError::Persistence(_) | SettlementError::WithdrawalStorage { .. } => {
                "Internal Server Error".to_string()
            }
            SettlementError::Transfer { .. } => "Blockchain transaction failed".to_string(),
            SettlementError::TransferUnconfirmed { .. } => {
                "Blockchain transaction status unknown - balance held for manual reconciliation"
                    .to_string()
            }
            SettlementError::RecordFailed { .. } => {
                "Transaction successful but record creation failed".to_string()
            }
            SettlementError::CriticalReconciliation { .. } => {
                "Transaction failed and rollback failed - requires manual intervention".to_string()
            }
            other => other.to_string(),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Withdrawal request failed");
        }

        let mut body = json!({ "success": false, "message": message });
        if let Some((public_key, amount)) = self.account() {
            body["publicKey"] = json!(public_key);
            body["amount"] = json!(amount);
        }
        match &self {
            SettlementError::Transfer { source, .. }
            | SettlementError::TransferUnconfirmed { source, .. } => {
                body["error"] = json!(source.to_string());
            }
            SettlementError::RecordFailed { receipt_id, .. } => {
                body["transactionSignature"] = json!(receipt_id);
            }
            SettlementError::CriticalReconciliation { .. } => {
                body["criticalError"] = json!(true);
            }
            _ => {}
        }
        if self.requires_manual_reconciliation() {
            body["requiresManualReconciliation"] = json!(true);
        }
        if let Some(state) = self.terminal_state() {
            body["state"] = json!(state);
        }

        (status, Json(body)).into_response()
    }
}

/// Get a validator's unsettled balance
async fn get_balance(
    State(state): State<PayoutApiState>,
    Path(public_key): Path<String>,
) -> Result<Json<BalanceResponse>, SettlementError> {
    let balance = state.machine.balance(&public_key).await?;
    Ok(Json(BalanceResponse {
        success: true,
        data: BalanceData {
            public_key,
            balance,
        },
    }))
}

/// Issue a fresh withdrawal challenge
async fn get_message(
    State(state): State<PayoutApiState>,
    Path(public_key): Path<String>,
) -> Result<Json<ChallengeResponse>, SettlementError> {
    let challenge = state.machine.issue_challenge(&public_key).await?;
    Ok(Json(ChallengeResponse {
        success: true,
        message: challenge.message,
        expires_at: challenge.expires_at,
    }))
}

/// Submit a signed withdrawal
async fn withdraw(
    State(state): State<PayoutApiState>,
    body: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, SettlementError> {
    let Json(body) =
        body.map_err(|e| SettlementError::Validation(format!("Invalid request body: {}", e)))?;
    let request = body.into_request()?;

    let receipt = state.machine.withdraw(&request).await?;
    Ok(Json(WithdrawResponse {
        success: true,
        transaction_signature: receipt.transaction.receipt_id.clone(),
        data: WithdrawData {
            remaining_balance: receipt.remaining_balance,
            transaction: receipt.transaction,
        },
        message: "Payout processed successfully".to_string(),
    }))
}

/// List a validator's completed payouts
async fn get_settlements(
    State(state): State<PayoutApiState>,
    Path(public_key): Path<String>,
) -> Result<Json<SettlementsResponse>, SettlementError> {
    let settlements = state.machine.history(&public_key).await?;
    Ok(Json(SettlementsResponse {
        success: true,
        count: settlements.len(),
        data: settlements,
    }))
}

/// Create payout API router
pub fn create_router(state: PayoutApiState) -> Router {
    Router::new()
        .route("/balance/{public_key}", get(get_balance))
        .route("/getMessage/{public_key}", get(get_message))
        .route("/withdraw", post(withdraw))
        .route("/settlements/{public_key}", get(get_settlements))
        .with_state(state)
}
