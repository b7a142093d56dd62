//! Payload encryption using AES-CFB.
//!
//! Wire format: a random 16-byte IV prepended to the CFB ciphertext, the
//! whole encoded with URL-safe base64. The key length selects AES-128/192/256.

use crate::error::CodecError;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use cfb_mode::{Decryptor, Encryptor};
use rand::RngCore;

/// AES block size; also the IV length.
const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyWidth {
    Aes128,
    Aes192,
    Aes256,
}

/// Encrypts and decrypts schedule payloads.
///
/// One instance is shared per process; all operations are stateless apart
/// from the key.
pub struct PayloadCipher {
    key: Vec<u8>,
    width: KeyWidth,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl PayloadCipher {
    /// Creates a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyLength`] unless the key is 16, 24, or
    /// 32 bytes long.
    pub fn new(key: &[u8]) -> Result<Self, CodecError> {
        let width = match key.len() {
            16 => KeyWidth::Aes128,
            24 => KeyWidth::Aes192,
            32 => KeyWidth::Aes256,
            len => return Err(CodecError::InvalidKeyLength { len }),
        };

        Ok(Self {
            key: key.to_vec(),
            width,
        })
    }

    /// Encrypts `plaintext` and returns the base64 wire form.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buf = plaintext.to_vec();
        match self.width {
            KeyWidth::Aes128 => Encryptor::<Aes128>::new_from_slices(&self.key, &iv)
                .expect("key and iv lengths validated in new")
                .encrypt(&mut buf),
            KeyWidth::Aes192 => Encryptor::<Aes192>::new_from_slices(&self.key, &iv)
                .expect("key and iv lengths validated in new")
                .encrypt(&mut buf),
            KeyWidth::Aes256 => Encryptor::<Aes256>::new_from_slices(&self.key, &iv)
                .expect("key and iv lengths validated in new")
                .encrypt(&mut buf),
        }

        let mut out = Vec::with_capacity(BLOCK_SIZE + buf.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&buf);
        URL_SAFE.encode(out)
    }

    /// Decrypts a base64 wire-form payload back to the original bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidEncoding`] on malformed base64 and
    /// [`CodecError::CiphertextTooShort`] when the input cannot contain an IV.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CodecError> {
        let raw = URL_SAFE
            .decode(encoded)
            .map_err(|e| CodecError::InvalidEncoding {
                reason: e.to_string(),
            })?;

        if raw.len() < BLOCK_SIZE {
            return Err(CodecError::CiphertextTooShort { len: raw.len() });
        }

        let (iv, ciphertext) = raw.split_at(BLOCK_SIZE);
        let mut buf = ciphertext.to_vec();
        match self.width {
            KeyWidth::Aes128 => Decryptor::<Aes128>::new_from_slices(&self.key, iv)
                .expect("key and iv lengths validated in new")
                .decrypt(&mut buf),
            KeyWidth::Aes192 => Decryptor::<Aes192>::new_from_slices(&self.key, iv)
                .expect("key and iv lengths validated in new")
                .decrypt(&mut buf),
            KeyWidth::Aes256 => Decryptor::<Aes256>::new_from_slices(&self.key, iv)
                .expect("key and iv lengths validated in new")
                .decrypt(&mut buf),
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PayloadCipher {
        PayloadCipher::new(b"0123456789abcdef0123456789abcdef").expect("valid 32-byte key")
    }

    #[test]
    fn rejects_bad_key_lengths() {
        assert!(PayloadCipher::new(b"short").is_err());
        assert!(PayloadCipher::new(&[0u8; 31]).is_err());
        assert!(PayloadCipher::new(&[0u8; 16]).is_ok());
        assert!(PayloadCipher::new(&[0u8; 24]).is_ok());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = cipher();
        let plaintext = br#"{"hello":"world","n":42}"#;
        let encoded = cipher.encrypt(plaintext);
        let decoded = cipher.decrypt(&encoded).expect("should decrypt");
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same payload");
        let b = cipher.encrypt(b"same payload");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let cipher = cipher();
        let encoded = cipher.encrypt(b"");
        assert_eq!(cipher.decrypt(&encoded).expect("should decrypt"), b"");
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let cipher = cipher();
        let encoded = URL_SAFE.encode([0u8; 8]);
        assert!(matches!(
            cipher.decrypt(&encoded),
            Err(CodecError::CiphertextTooShort { len: 8 })
        ));
    }

    #[test]
    fn rejects_invalid_base64() {
        let cipher = cipher();
        assert!(matches!(
            cipher.decrypt("not base64!!!"),
            Err(CodecError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn key_width_changes_ciphertext() {
        let small = PayloadCipher::new(&[7u8; 16]).expect("valid key");
        let encoded = small.encrypt(b"payload");
        assert_eq!(small.decrypt(&encoded).expect("should decrypt"), b"payload");
    }
}
