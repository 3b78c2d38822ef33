//! Error types for the relaychat core
//!
//! Each component has its own closed error enum; `CoreError` is the umbrella
//! surfaced by the public API.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the packet codec and stream framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("malformed packet: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the contact store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("contact {0} not found")]
    NotFound(String),

    #[error("contact {0} is not pending")]
    NotPending(String),

    #[error("you cannot add yourself as a contact")]
    SelfReference,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from the asymmetric message encryption boundary.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("message of {len} bytes exceeds the {max} byte limit for this key")]
    MessageTooLong { len: usize, max: usize },

    #[error("encryption failed: {0}")]
    Encrypt(rsa::Error),

    #[error("decryption failed")]
    Decrypt,

    #[error("invalid key material: {0}")]
    Pem(#[from] rsa::pkcs1::Error),

    #[error("ciphertext is not valid hex: {0}")]
    CiphertextEncoding(#[from] hex::FromHexError),
}

/// Errors around the identity record and keypair.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("key generation failed: {0}")]
    KeyGen(rsa::Error),

    #[error("invalid key material: {0}")]
    Pem(#[from] rsa::pkcs1::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors around the settings record.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("settings file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("username longer than {0} characters")]
    UsernameTooLong(usize),

    #[error("expected {expected} colors, got {got}")]
    ColorCount { expected: usize, got: usize },

    #[error("settings re-read after save does not match what was written")]
    WritebackMismatch,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the relay client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the relay")]
    Offline,

    #[error("could not reach relay at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Umbrella error surfaced by the public `RelayChatCore` API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
