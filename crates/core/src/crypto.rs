//! Asymmetric message encryption boundary
//!
//! Message bodies are encrypted directly with the recipient's RSA public key
//! (PKCS#1 v1.5) and carried as hex text inside packets. Plaintext length is
//! therefore bounded by the key size; oversize messages are rejected before
//! anything touches the wire.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::error::CryptoError;

// PKCS#1 v1.5 padding consumes 11 bytes of the modulus
const PKCS1_PADDING_OVERHEAD: usize = 11;

/// Largest plaintext the given public key can encrypt in one block.
pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(PKCS1_PADDING_OVERHEAD)
}

/// Parse a contact's PKCS#1 PEM public key.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    Ok(RsaPublicKey::from_pkcs1_pem(pem)?)
}

/// Encrypt `plaintext` for the holder of `recipient`, returning hex-encoded
/// ciphertext suitable for a text packet.
pub fn encrypt_for(recipient: &RsaPublicKey, plaintext: &str) -> Result<String, CryptoError> {
    let bytes = plaintext.as_bytes();
    let max = max_plaintext_len(recipient);
    if bytes.len() > max {
        return Err(CryptoError::MessageTooLong {
            len: bytes.len(),
            max,
        });
    }

    let ciphertext = recipient
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, bytes)
        .map_err(CryptoError::Encrypt)?;
    Ok(hex::encode(ciphertext))
}

/// Decrypt hex-encoded ciphertext with our private key back to plaintext.
///
/// Deliberately collapses every failure mode after hex decoding into a single
/// opaque `Decrypt` error.
pub fn decrypt_with(key: &RsaPrivateKey, ciphertext_hex: &str) -> Result<String, CryptoError> {
    let ciphertext = hex::decode(ciphertext_hex)?;
    let plaintext = key
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}
