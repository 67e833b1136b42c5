//! HTTP transfer relayer
//!
//! Posts payout requests to an external signing relayer that submits the
//! transfer to the settlement network and answers once it is confirmed.
//! Attempts share one idempotency key, so a retried request after a lost
//! response cannot pay twice.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::gateway::{TransferError, TransferGateway, TransferReceipt};

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    /// Relayer payout endpoint
    pub endpoint: String,
    /// Sent as `x-api-key`
    pub api_key: String,
    /// Treasury address the relayer pays from
    pub treasury: String,
    pub require_https: bool,
    pub timeout_secs: u64,
    /// Total attempts per transfer, including the first
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            treasury: String::new(),
            require_https: true,
            timeout_secs: 60,
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayoutRequest<'a> {
    recipient: &'a str,
    amount: u64,
    idempotency_key: String,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    signature: Option<String>,
    error: Option<String>,
}

pub struct HttpTransferGateway {
    client: Client,
    endpoint: Url,
    config: RelayerConfig,
}

impl HttpTransferGateway {
    pub fn new(config: RelayerConfig) -> anyhow::Result<Self> {
        let endpoint = validate_endpoint(&config.endpoint, config.require_https)?;

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("uptime-hub/0.1 (payout relayer client)");
        if config.require_https {
            builder = builder.https_only(true);
        }
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create relayer HTTP client: {}", e))?;

        info!(endpoint = %endpoint, max_attempts = config.max_attempts, "Transfer relayer configured");
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    async fn attempt(&self, request: &PayoutRequest<'_>) -> Result<TransferReceipt, AttemptError> {
        let response = self
            .client
            .post(self.endpoint.as_str())
            .header("x-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AttemptError::NotDelivered(e.to_string())
                } else {
                    AttemptError::Uncertain(e.to_string())
                }
            })?;

        let status = response.status();
        let body: Option<PayoutResponse> = response.json().await.ok();

        if status.is_success() {
            return match body.and_then(|b| b.signature) {
                Some(signature) if !signature.is_empty() => Ok(TransferReceipt {
                    receipt_id: signature,
                    sender: self.config.treasury.clone(),
                }),
                // Relayer accepted the payout but gave nothing to record
                _ => Err(AttemptError::Fatal(TransferError::Unconfirmed(format!(
                    "{} without a transaction signature",
                    status.as_u16()
                )))),
            };
        }

        let reason = body
            .and_then(|b| b.error)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        Err(classify_failure(status, format!("{}: {}", status.as_u16(), reason)))
    }
}

/// Outcome of one failed attempt
enum AttemptError {
    /// The relayer never acted on the request; safe to roll back
    NotDelivered(String),
    /// The relayer may have acted on the request
    Uncertain(String),
    /// No retry can change the answer
    Fatal(TransferError),
}

/// 429 is refused before any work; a 5xx may come after the payout went out
fn classify_failure(status: StatusCode, reason: String) -> AttemptError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        AttemptError::NotDelivered(reason)
    } else if status.is_server_error() {
        AttemptError::Uncertain(reason)
    } else {
        AttemptError::Fatal(TransferError::Rejected(reason))
    }
}

fn validate_endpoint(endpoint: &str, require_https: bool) -> anyhow::Result<Url> {
    let parsed = Url::parse(endpoint)
        .map_err(|e| anyhow::anyhow!("Invalid relayer URL {}: {}", endpoint, e))?;

    if require_https && parsed.scheme() != "https" {
        return Err(anyhow::anyhow!(
            "HTTPS is required but relayer URL uses {}: {}",
            parsed.scheme(),
            endpoint
        ));
    }
    if parsed.host_str().is_none() {
        return Err(anyhow::anyhow!("Relayer URL must have a valid host: {}", endpoint));
    }

    Ok(parsed)
}

#[async_trait]
impl TransferGateway for HttpTransferGateway {
    async fn transfer(&self, recipient: &str, amount: u64) -> Result<TransferReceipt, TransferError> {
        let request = PayoutRequest {
            recipient,
            amount,
            idempotency_key: Uuid::now_v7().to_string(),
        };

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();
        let mut maybe_delivered = false;

        for attempt in 1..=attempts {
            let reason = match self.attempt(&request).await {
                Ok(receipt) => {
                    info!(
                        recipient = %recipient,
                        amount = %amount,
                        receipt = %receipt.receipt_id,
                        attempt,
                        "Relayer transfer confirmed"
                    );
                    return Ok(receipt);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::NotDelivered(reason)) => reason,
                Err(AttemptError::Uncertain(reason)) => {
                    maybe_delivered = true;
                    reason
                }
            };

            warn!(attempt, max_attempts = attempts, error = %reason, "Relayer transfer attempt failed");
            last_error = reason;
            if attempt < attempts {
                let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        if maybe_delivered {
            Err(TransferError::Unconfirmed(last_error))
        } else {
            Err(TransferError::Unavailable(last_error))
        }
    }
}
