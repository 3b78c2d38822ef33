//! Client identity: unique id plus long-lived RSA keypair
//!
//! The identity is loaded from `identity.json` at the data root, or generated
//! and persisted on first start. It never changes afterwards.

use rand::distributions::Alphanumeric;
use rand::Rng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::IdentityError;

const IDENTITY_FILE: &str = "identity.json";

/// Length of a client uid.
pub const UID_LEN: usize = 16;

/// RSA modulus size for generated keypairs.
pub const KEY_BITS: usize = 2048;

/// Check that a uid is well-formed (16 alphanumeric ASCII characters).
pub fn is_valid_uid(uid: &str) -> bool {
    uid.len() == UID_LEN && uid.chars().all(|c| c.is_ascii_alphanumeric())
}

/// On-disk identity record. Key material is PKCS#1 PEM.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityRecord {
    uid: String,
    public_pem: String,
    private_pem: String,
}

/// The client's persistent identity. Immutable after load.
pub struct Identity {
    uid: String,
    public: RsaPublicKey,
    private: RsaPrivateKey,
    public_pem: String,
}

impl Identity {
    /// Load the identity from `data_root`, generating and persisting a fresh
    /// one when the record is absent or unreadable. Generation failure is
    /// fatal to startup.
    pub fn load_or_create(data_root: &Path) -> Result<Self, IdentityError> {
        let path = data_root.join(IDENTITY_FILE);

        if let Some(identity) = Self::load(&path) {
            info!("loaded identity {}", identity.uid);
            return Ok(identity);
        }

        let identity = Self::generate()?;
        identity.persist(&path)?;
        info!("generated new identity {}", identity.uid);
        Ok(identity)
    }

    fn load(path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(path).ok()?;
        let record: IdentityRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("identity record at {} is corrupt: {}", path.display(), e);
                return None;
            }
        };

        if !is_valid_uid(&record.uid) {
            warn!("identity record carries malformed uid {:?}", record.uid);
            return None;
        }

        let public = RsaPublicKey::from_pkcs1_pem(&record.public_pem).ok()?;
        let private = RsaPrivateKey::from_pkcs1_pem(&record.private_pem).ok()?;

        Some(Self {
            uid: record.uid,
            public,
            private,
            public_pem: record.public_pem,
        })
    }

    fn generate() -> Result<Self, IdentityError> {
        let mut rng = rand::thread_rng();

        let uid: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(UID_LEN)
            .map(char::from)
            .collect();

        let private = RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(IdentityError::KeyGen)?;
        let public = RsaPublicKey::from(&private);
        let public_pem = public.to_pkcs1_pem(LineEnding::LF)?;

        Ok(Self {
            uid,
            public,
            private,
            public_pem,
        })
    }

    fn persist(&self, path: &Path) -> Result<(), IdentityError> {
        let private_pem = self.private.to_pkcs1_pem(LineEnding::LF)?;
        let record = IdentityRecord {
            uid: self.uid.clone(),
            public_pem: self.public_pem.clone(),
            private_pem: private_pem.as_str().to_owned(),
        };
        fs::write(path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// PKCS#1 PEM of the public key, as announced to the relay and contacts.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_validation() {
        assert!(is_valid_uid("a1B2c3D4e5F6g7H8"));
        assert!(!is_valid_uid("short"));
        assert!(!is_valid_uid("a1B2c3D4e5F6g7H8x"));
        assert!(!is_valid_uid("a1B2c3D4e5F6g7H!"));
    }

    #[test]
    fn test_load_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        let first = Identity::load_or_create(dir.path()).unwrap();
        assert!(is_valid_uid(first.uid()));

        let second = Identity::load_or_create(dir.path()).unwrap();
        assert_eq!(first.uid(), second.uid());
        assert_eq!(first.public_key_pem(), second.public_key_pem());
        let first_private = first.private_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        let second_private = second.private_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        assert_eq!(first_private.as_str(), second_private.as_str());
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(IDENTITY_FILE), "not json").unwrap();

        let identity = Identity::load_or_create(dir.path()).unwrap();
        assert!(is_valid_uid(identity.uid()));

        // The fresh record must have been persisted before use
        let reloaded = Identity::load_or_create(dir.path()).unwrap();
        assert_eq!(identity.uid(), reloaded.uid());
    }
}
