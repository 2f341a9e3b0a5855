//! Anonymous public-key sealing of secret values.
//!
//! Compatible with libsodium's `crypto_box_seal`: each call generates an
//! ephemeral X25519 keypair, derives a one-time shared key with the recipient's
//! public key and encrypts with XSalsa20-Poly1305. The ephemeral public key is
//! prefixed to the ciphertext so the recipient only needs its own secret key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SecretKey};
use thiserror::Error;

/// Size of an X25519 public key in bytes.
pub const KEY_SIZE: usize = 32;

/// Bytes added to every sealed plaintext: ephemeral public key plus MAC.
pub const SEAL_OVERHEAD: usize = KEY_SIZE + 16;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("public key is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("public key must be {KEY_SIZE} bytes, got {0}")]
    InvalidPublicKey(usize),

    #[error("failed to seal value")]
    Seal,

    #[error("failed to open sealed value: wrong key or corrupted ciphertext")]
    Open,
}

/// Seals `plaintext` so only the holder of the secret key matching
/// `recipient` can read it.
pub fn seal(recipient: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    PublicKey::from(*recipient)
        .seal(&mut OsRng, plaintext)
        .map_err(|_| SealError::Seal)
}

/// [`seal`] followed by standard base64 encoding, for JSON transport.
pub fn seal_base64(recipient: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<String, SealError> {
    seal(recipient, plaintext).map(|sealed| STANDARD.encode(sealed))
}

pub fn unseal(secret_key: &SecretKey, ciphertext: &[u8]) -> Result<Vec<u8>, SealError> {
    secret_key.unseal(ciphertext).map_err(|_| SealError::Open)
}

/// Decodes a base64 public key as published by e.g. GitHub.
pub fn public_key_from_base64(encoded: &str) -> Result<[u8; KEY_SIZE], SealError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| SealError::InvalidPublicKey(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (SecretKey, [u8; KEY_SIZE]) {
        let secret = SecretKey::generate(&mut OsRng);
        let public = *secret.public_key().as_bytes();
        (secret, public)
    }

    #[test]
    fn test_seal_then_unseal() {
        let (secret, public) = keypair();
        let plaintext = b"wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";

        let sealed = seal(&public, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + SEAL_OVERHEAD);
        assert_eq!(unseal(&secret, &sealed).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn test_seal_empty_input() {
        let (secret, public) = keypair();
        let sealed = seal(&public, b"").unwrap();
        assert_eq!(sealed.len(), SEAL_OVERHEAD);
        assert!(unseal(&secret, &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_seal_binary_input() {
        let (secret, public) = keypair();
        let plaintext: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let sealed = seal(&public, &plaintext).unwrap();
        assert_eq!(unseal(&secret, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_each_seal_uses_fresh_ephemeral_key() {
        let (_, public) = keypair();
        let a = seal(&public, b"same").unwrap();
        let b = seal(&public, b"same").unwrap();
        assert_ne!(a[..KEY_SIZE], b[..KEY_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_unseal_with_wrong_key_fails() {
        let (_, public) = keypair();
        let (other, _) = keypair();
        let sealed = seal(&public, b"secret").unwrap();
        assert!(matches!(unseal(&other, &sealed), Err(SealError::Open)));
    }

    #[test]
    fn test_unseal_tampered_fails() {
        let (secret, public) = keypair();
        let mut sealed = seal(&public, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(unseal(&secret, &sealed).is_err());
    }

    #[test]
    fn test_seal_base64_decodes_to_sealed_box() {
        let (secret, public) = keypair();
        let encoded = seal_base64(&public, b"value").unwrap();
        let sealed = STANDARD.decode(encoded).unwrap();
        assert_eq!(unseal(&secret, &sealed).unwrap(), b"value".to_vec());
    }

    #[test]
    fn test_public_key_from_base64() {
        let (_, public) = keypair();
        let encoded = STANDARD.encode(public);
        assert_eq!(public_key_from_base64(&encoded).unwrap(), public);
    }

    #[test]
    fn test_public_key_wrong_length() {
        let encoded = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            public_key_from_base64(&encoded),
            Err(SealError::InvalidPublicKey(16))
        ));
    }

    #[test]
    fn test_public_key_bad_encoding() {
        assert!(matches!(
            public_key_from_base64("not base64!!"),
            Err(SealError::InvalidEncoding(_))
        ));
    }
}
