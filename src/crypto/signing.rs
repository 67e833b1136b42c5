use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding keys or signatures from the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid public key encoding: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
}

/// Signature as sent by validators and the dashboard.
///
/// Validators send the signature as a string holding a JSON array of byte
/// values (`"[12,34,...]"`); the dashboard posts a serialized byte buffer
/// (`{"data": [12,34,...]}`). A bare array and a base58 string are also
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireSignature {
    Bytes(Vec<u8>),
    Buffer { data: Vec<u8> },
    Text(String),
}

impl WireSignature {
    /// Decode into an Ed25519 signature (64 bytes required)
    pub fn to_signature(&self) -> Result<Signature, SignatureError> {
        let bytes = match self {
            WireSignature::Bytes(bytes) => bytes.clone(),
            WireSignature::Buffer { data } => data.clone(),
            WireSignature::Text(text) => decode_signature_text(text)?,
        };

        let sig_array: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
            SignatureError::InvalidSignature(format!("expected 64 bytes, got {}", bytes.len()))
        })?;

        Ok(Signature::from_bytes(&sig_array))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WireSignature::Bytes(bytes) => bytes.is_empty(),
            WireSignature::Buffer { data } => data.is_empty(),
            WireSignature::Text(text) => text.trim().is_empty(),
        }
    }
}

fn decode_signature_text(text: &str) -> Result<Vec<u8>, SignatureError> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<u8>>(trimmed)
            .map_err(|e| SignatureError::InvalidSignature(e.to_string()));
    }

    bs58::decode(trimmed)
        .into_vec()
        .map_err(|e| SignatureError::InvalidSignature(e.to_string()))
}

/// Parse a base58-encoded Ed25519 public key
pub fn parse_public_key(encoded: &str) -> Result<VerifyingKey, SignatureError> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;

    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        SignatureError::InvalidPublicKey(format!("expected 32 bytes, got {}", bytes.len()))
    })?;

    VerifyingKey::from_bytes(&key_bytes).map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    bs58::encode(key.to_bytes()).into_string()
}

/// Encode a signature the way validators put it on the wire
pub fn encode_signature_json(signature: &Signature) -> String {
    serde_json::to_string(&signature.to_bytes().to_vec()).unwrap_or_default()
}

/// Stateless detached-signature verification.
///
/// Every malformed input is a verification failure, never a panic or error.
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Verify `signature` over the UTF-8 bytes of `message`
    pub fn verify(message: &str, public_key: &VerifyingKey, signature: &WireSignature) -> bool {
        match signature.to_signature() {
            Ok(sig) => public_key.verify(message.as_bytes(), &sig).is_ok(),
            Err(_) => false,
        }
    }

    /// Verify against a base58 public key supplied by the caller
    pub fn verify_encoded(message: &str, public_key: &str, signature: &WireSignature) -> bool {
        match parse_public_key(public_key) {
            Ok(key) => Self::verify(message, &key, signature),
            Err(_) => false,
        }
    }
}
