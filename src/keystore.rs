//! Per-user ECDSA P-256 signing keys for ledger transfers.
//!
//! Public keys are exchanged as base64 SEC1 uncompressed points and
//! signatures as base64 raw `r || s` (64 bytes), SHA-256 over the message.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use tracing::info;

use crate::error::{MinerError, MinerResult};

/// Storage for one signing key per user.
///
/// Backends only load and store raw keys; generation, signing and public key
/// export are shared.
pub trait KeyStore: Send + Sync {
    fn load(&self, user_id: &str) -> MinerResult<Option<SigningKey>>;

    fn store(&self, user_id: &str, key: &SigningKey) -> MinerResult<()>;

    fn exists(&self, user_id: &str) -> MinerResult<bool> {
        Ok(self.load(user_id)?.is_some())
    }

    /// Create and persist a fresh key pair, replacing any existing one.
    /// Returns the encoded public key.
    fn generate(&self, user_id: &str) -> MinerResult<String> {
        let key = SigningKey::random(&mut OsRng);
        self.store(user_id, &key)?;
        Ok(encode_public_key(key.verifying_key()))
    }

    fn public_key(&self, user_id: &str) -> MinerResult<String> {
        let key = self.require(user_id)?;
        Ok(encode_public_key(key.verifying_key()))
    }

    fn sign(&self, user_id: &str, message: &[u8]) -> MinerResult<String> {
        let key = self.require(user_id)?;
        let signature: Signature = key.sign(message);
        Ok(general_purpose::STANDARD.encode(signature.to_bytes()))
    }

    fn require(&self, user_id: &str) -> MinerResult<SigningKey> {
        self.load(user_id)?
            .ok_or_else(|| MinerError::KeyNotFound(user_id.to_string()))
    }
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    general_purpose::STANDARD.encode(key.to_encoded_point(false).as_bytes())
}

/// Check a base64 signature against a base64 public key.
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> MinerResult<bool> {
    let key_bytes = general_purpose::STANDARD
        .decode(public_key)
        .map_err(|e| MinerError::KeyStore(format!("public key: {e}")))?;
    let key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|e| MinerError::KeyStore(format!("public key: {e}")))?;
    let sig_bytes = general_purpose::STANDARD
        .decode(signature)
        .map_err(|e| MinerError::KeyStore(format!("signature: {e}")))?;
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return Ok(false);
    };
    Ok(key.verify(message, &signature).is_ok())
}

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, SigningKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self, user_id: &str) -> MinerResult<Option<SigningKey>> {
        Ok(self.keys.lock().get(user_id).cloned())
    }

    fn store(&self, user_id: &str, key: &SigningKey) -> MinerResult<()> {
        self.keys.lock().insert(user_id.to_string(), key.clone());
        Ok(())
    }
}

/// Default key directory, `~/.unlucoin/keys`.
pub fn default_key_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".unlucoin").join("keys")
}

/// One hex-encoded secret scalar per user, in `<dir>/<hex(user_id)>.key`.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        // User ids such as `auth0|123` aren't safe file names.
        self.dir.join(format!("{}.key", hex::encode(user_id)))
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self, user_id: &str) -> MinerResult<Option<SigningKey>> {
        let path = self.path_for(user_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bytes = hex::decode(content.trim())
            .map_err(|e| MinerError::KeyStore(format!("{}: {e}", path.display())))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| MinerError::KeyStore(format!("{}: {e}", path.display())))?;
        Ok(Some(key))
    }

    fn store(&self, user_id: &str, key: &SigningKey) -> MinerResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(user_id);
        fs::write(&path, hex::encode(key.to_bytes()))?;
        info!(path = %path.display(), "Saved signing key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn temp_dir() -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen_range(0..u64::MAX);
        std::env::temp_dir().join(format!("unlucoin-keys-{suffix:x}"))
    }

    fn check_store(store: &dyn KeyStore) {
        assert!(!store.exists("alice").unwrap());
        assert!(matches!(store.sign("alice", b"x"), Err(MinerError::KeyNotFound(_))));

        let public = store.generate("alice").unwrap();
        assert!(store.exists("alice").unwrap());
        assert_eq!(store.public_key("alice").unwrap(), public);
        // SEC1 uncompressed: 0x04 || X || Y
        let raw = general_purpose::STANDARD.decode(&public).unwrap();
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);

        let signature = store.sign("alice", b"alice-bob-10").unwrap();
        assert_eq!(general_purpose::STANDARD.decode(&signature).unwrap().len(), 64);
        assert!(verify(&public, b"alice-bob-10", &signature).unwrap());
        assert!(!verify(&public, b"alice-bob-11", &signature).unwrap());

        let other = store.generate("bob").unwrap();
        assert!(!verify(&other, b"alice-bob-10", &signature).unwrap());
    }

    #[test]
    fn test_memory_store() {
        check_store(&MemoryKeyStore::new());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = temp_dir();
        check_store(&FileKeyStore::new(&dir));

        let reopened = FileKeyStore::new(&dir);
        let public = reopened.public_key("alice").unwrap();
        let signature = reopened.sign("alice", b"again").unwrap();
        assert!(verify(&public, b"again", &signature).unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_odd_user_ids() {
        let dir = temp_dir();
        let store = FileKeyStore::new(&dir);
        store.generate("auth0|64f/../x").unwrap();
        assert!(store.exists("auth0|64f/../x").unwrap());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_key_file() {
        let dir = temp_dir();
        let store = FileKeyStore::new(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path_for("carol"), "not hex").unwrap();
        assert!(matches!(store.load("carol"), Err(MinerError::KeyStore(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_malformed_signature() {
        let store = MemoryKeyStore::new();
        let public = store.generate("alice").unwrap();
        let short = general_purpose::STANDARD.encode([1u8; 10]);
        assert!(!verify(&public, b"m", &short).unwrap());
        assert!(verify(&public, b"m", "***").is_err());
    }
}
