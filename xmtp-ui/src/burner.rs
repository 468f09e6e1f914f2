//! Burner identities: ephemeral local wallets persisted through a simple
//! string key store so demos and tests keep the same identity across runs.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use k256::ecdsa::signature::hazmat::PrehashSigner as _;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use sha3::{Digest as _, Keccak256};

use crate::error::{Error, Result};
use crate::types::Wallet;

/// Storage key under which the burner private key is persisted.
const BURNER_KEY: &str = "burner.key";

/// Minimal persistent storage: a single string value per key.
pub trait KeyStore: Send + Sync {
    /// Read a stored value.
    fn get(&self, key: &str) -> Option<String>;

    /// Persist a value.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory key store for tests.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("key store lock")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .expect("key store lock")
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// File-backed key store under the platform data directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Store under `<data_dir>/xmtp-ui`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("xmtp-ui"),
        }
    }

    /// Store under an explicit directory.
    #[must_use]
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for FileKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.dir.join(key))
            .ok()
            .map(|s| s.trim().to_owned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::KeyStore(format!("create dir: {e}")))?;
        fs::write(self.dir.join(key), value).map_err(|e| Error::KeyStore(format!("write: {e}")))
    }
}

/// An ephemeral, locally generated Ethereum wallet.
pub struct BurnerWallet {
    key: SigningKey,
    address: String,
}

impl fmt::Debug for BurnerWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BurnerWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl BurnerWallet {
    /// Generate a fresh random wallet.
    ///
    /// # Errors
    ///
    /// Returns an error when the OS random source fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        getrandom::fill(&mut bytes).map_err(|e| Error::Signing(format!("rng: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Build a wallet from raw 32-byte key material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] when the bytes are not a valid secp256k1
    /// secret key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let key =
            SigningKey::from_slice(bytes).map_err(|e| Error::Signing(e.to_string()))?;
        let address = eth_address(&key);
        Ok(Self { key, address })
    }

    /// Build a wallet from a hex-encoded private key, with or without a
    /// `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] when the string is not 32 valid hex bytes.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes =
            hex::decode(hex_key).map_err(|e| Error::Signing(format!("invalid hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Signing("key must be 32 bytes".into()))?;
        Self::from_bytes(&bytes)
    }

    /// Hex-encoded private key, for persistence.
    #[must_use]
    pub fn export_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }
}

#[async_trait]
impl Wallet for BurnerWallet {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign_message(&self, message: &str) -> Result<String> {
        let prefixed = format!("\x19Ethereum Signed Message:\n{}{}", message.len(), message);
        let hash = Keccak256::digest(prefixed.as_bytes());
        let (sig, recid): (Signature, RecoveryId) = self
            .key
            .sign_prehash(&hash)
            .map_err(|e| Error::Signing(format!("ecdsa: {e}")))?;
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(27 + recid.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

/// Derive an Ethereum address from a signing key.
fn eth_address(key: &SigningKey) -> String {
    let pubkey = key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&pubkey.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Reuse the persisted burner identity, or generate and persist a new one.
///
/// A missing or corrupt stored key falls back to a fresh wallet, which is
/// written back so later sessions see the same identity.
///
/// # Errors
///
/// Returns an error when key generation or persistence fails.
pub fn load_or_create(store: &dyn KeyStore) -> Result<BurnerWallet> {
    if let Some(stored) = store.get(BURNER_KEY)
        && let Ok(wallet) = BurnerWallet::from_hex(stored.trim())
    {
        return Ok(wallet);
    }
    let wallet = BurnerWallet::generate()?;
    store.set(BURNER_KEY, &wallet.export_hex())?;
    Ok(wallet)
}
