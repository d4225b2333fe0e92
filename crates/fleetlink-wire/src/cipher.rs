//! AES-CFB payload encryption.
//!
//! Confidentiality only; integrity comes from the HMAC signature the codec
//! puts on every [`Message`](fleetlink_types::Message). The output format is
//! `hex(IV || ciphertext)` with a fresh random 16-byte IV per call.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use rand::RngCore;
use thiserror::Error;

/// AES block size; the IV prepended to every ciphertext.
pub const IV_LEN: usize = 16;

/// Errors from the payload cipher.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The pre-shared key is not a valid AES key. Fatal configuration error.
    #[error("invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
    #[error("ciphertext is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("ciphertext too short: {0} bytes (need at least {IV_LEN})")]
    CiphertextTooShort(usize),
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Check the pre-shared key is a valid AES key size.
pub fn validate_key(key: &str) -> Result<(), CipherError> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(CipherError::InvalidKeyLength(n)),
    }
}

enum Direction {
    Encrypt,
    Decrypt,
}

fn apply(key: &[u8], iv: &[u8], buf: &mut [u8], direction: Direction) -> Result<(), CipherError> {
    let bad_key = || CipherError::InvalidKeyLength(key.len());
    match (key.len(), direction) {
        (16, Direction::Encrypt) => cfb_mode::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt(buf),
        (16, Direction::Decrypt) => cfb_mode::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt(buf),
        (24, Direction::Encrypt) => cfb_mode::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt(buf),
        (24, Direction::Decrypt) => cfb_mode::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt(buf),
        (32, Direction::Encrypt) => cfb_mode::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .encrypt(buf),
        (32, Direction::Decrypt) => cfb_mode::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| bad_key())?
            .decrypt(buf),
        _ => return Err(bad_key()),
    }
    Ok(())
}

/// Encrypt a payload with the pre-shared key.
///
/// Returns `hex(IV || ciphertext)`; the IV is fresh per call so identical
/// plaintexts never produce identical ciphertext.
pub fn encrypt(plaintext: &str, key: &str) -> Result<String, CipherError> {
    validate_key(key)?;

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut buf = plaintext.as_bytes().to_vec();
    apply(key.as_bytes(), &iv, &mut buf, Direction::Encrypt)?;

    let mut out = Vec::with_capacity(IV_LEN + buf.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buf);
    Ok(hex::encode(out))
}

/// Decrypt `hex(IV || ciphertext)` produced by [`encrypt`].
pub fn decrypt(encrypted: &str, key: &str) -> Result<String, CipherError> {
    validate_key(key)?;

    let raw = hex::decode(encrypted)?;
    if raw.len() < IV_LEN {
        return Err(CipherError::CiphertextTooShort(raw.len()));
    }
    let (iv, body) = raw.split_at(IV_LEN);

    let mut buf = body.to_vec();
    apply(key.as_bytes(), iv, &mut buf, Direction::Decrypt)?;
    String::from_utf8(buf).map_err(|_| CipherError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY16: &str = "0123456789abcdef";
    const KEY24: &str = "0123456789abcdef01234567";
    const KEY32: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_roundtrip_all_key_sizes() {
        for key in [KEY16, KEY24, KEY32] {
            for payload in ["", "hi", "Heartbeat", "echo hi", "日本語 payload"] {
                let encrypted = encrypt(payload, key).unwrap();
                assert_eq!(decrypt(&encrypted, key).unwrap(), payload);
            }
        }
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let a = encrypt("same plaintext", KEY16).unwrap();
        let b = encrypt("same plaintext", KEY16).unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&a, KEY16).unwrap(), decrypt(&b, KEY16).unwrap());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            encrypt("x", "tooshort"),
            Err(CipherError::InvalidKeyLength(8))
        ));
        assert!(matches!(
            decrypt("00", "tooshort"),
            Err(CipherError::InvalidKeyLength(8))
        ));
    }

    #[test]
    fn test_ciphertext_too_short() {
        // 8 raw bytes, less than one IV block.
        assert!(matches!(
            decrypt("0011223344556677", KEY16),
            Err(CipherError::CiphertextTooShort(8))
        ));
    }

    #[test]
    fn test_bad_hex() {
        assert!(matches!(
            decrypt("not hex at all!", KEY16),
            Err(CipherError::BadHex(_))
        ));
    }

    #[test]
    fn test_wrong_key_garbles() {
        let encrypted = encrypt("secret", KEY16).unwrap();
        let other = decrypt(&encrypted, "fedcba9876543210");
        // CFB has no integrity; a wrong key yields garbage or invalid UTF-8,
        // never the plaintext.
        if let Ok(plain) = other {
            assert_ne!(plain, "secret");
        }
    }
}
