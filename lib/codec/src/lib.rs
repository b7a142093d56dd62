//! Payload codec for the punctual webhook scheduler.
//!
//! This crate provides:
//!
//! - **Cipher**: AES-CFB payload encryption with a random IV prefix and
//!   URL-safe base64 wire form
//! - **Signature**: HMAC-SHA256 URL signatures for one-time webhook
//!   verification

pub mod cipher;
pub mod error;
pub mod signature;

pub use cipher::PayloadCipher;
pub use error::CodecError;
pub use signature::{sign_url, verify_signature};
