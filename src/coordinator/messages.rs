//! Validator wire protocol
//!
//! Every frame is a JSON object `{"type": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::crypto::WireSignature;
use crate::database::TickStatus;

/// Frames a validator sends to the hub
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IncomingMessage {
    #[serde(rename = "signUp")]
    SignUp(SignUpRequest),
    #[serde(rename = "validate")]
    Validate(ValidationReply),
}

/// Frames the hub sends to a validator
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum OutgoingMessage {
    #[serde(rename = "signUp")]
    SignUp(SignUpAck),
    #[serde(rename = "validate")]
    Validate(ValidationTask),
}

/// Signature is over `"Signed Message for SignUp,<callbackId> <publicKey>"`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    #[serde(alias = "publickey")]
    pub public_key: String,
    pub signed_message: WireSignature,
    pub callback_id: String,
}

impl SignUpRequest {
    pub fn expected_message(&self) -> String {
        signup_message(&self.callback_id, &self.public_key)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignUpAck {
    pub validator_id: i32,
    pub callback_id: String,
}

/// Check request for one target
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationTask {
    pub url: String,
    pub callback_id: String,
}

/// Signature is over `"Replying to <callbackId>"`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReply {
    pub callback_id: String,
    pub status: TickStatus,
    /// Milliseconds; validators may report fractional values
    pub latency: f64,
    pub signed_message: WireSignature,
}

impl ValidationReply {
    pub fn expected_message(&self) -> String {
        reply_message(&self.callback_id)
    }

    /// Latency clamped into the stored integer range
    pub fn latency_ms(&self) -> i32 {
        if !self.latency.is_finite() || self.latency < 0.0 {
            return 0;
        }
        self.latency.round().min(i32::MAX as f64) as i32
    }
}

pub fn signup_message(callback_id: &str, public_key: &str) -> String {
    format!("Signed Message for SignUp,{} {}", callback_id, public_key)
}

pub fn reply_message(callback_id: &str) -> String {
    format!("Replying to {}", callback_id)
}
