//! Cryptographic utilities for the validator hub
//!
//! Provides Ed25519 detached-signature verification for:
//! - Validator signup attestations
//! - Signed check results
//! - Withdrawal challenge responses
//!
//! Public keys travel as base58 strings (settlement network address format).

pub mod signing;

pub use signing::{
    SignatureError, SignatureVerifier, WireSignature, encode_public_key, encode_signature_json,
    parse_public_key,
};
