//! Revocable download-link tokens
//!
//! A token is `base64url(nonce || XChaCha20-Poly1305("<seed>:<tenant>/<order>/<file>"))`
//! under a process-wide key. The seed is derived from the order's `.seed`
//! file, so deleting that file invalidates every token issued for the order
//! at once; the next mint creates fresh seed material.

use crate::error::{Error, Result, TokenError};
use crate::order::{OrderStore, not_found};
use crate::types::OrderId;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Raw key length in bytes
pub const KEY_LEN: usize = 32;
/// Seed material length in bytes
const SEED_MATERIAL_LEN: usize = 32;
/// Hex characters of the seed digest embedded in tokens
const SEED_LEN: usize = 16;
/// XChaCha20 nonce length in bytes
const NONCE_LEN: usize = 24;

/// The file a validated token points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenTarget {
    /// Order owning the file
    pub order: OrderId,
    /// File name inside the order directory
    pub file_name: String,
}

impl TokenTarget {
    /// `tenant/order/file`, relative to the data directory
    pub fn relative_path(&self) -> PathBuf {
        self.order.relative_dir().join(&self.file_name)
    }
}

/// Mints and validates tokens for orders in a store
pub struct TokenService {
    cipher: XChaCha20Poly1305,
    store: OrderStore,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Service using an explicit key
    pub fn new(key: [u8; KEY_LEN], store: OrderStore) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key)),
            store,
        }
    }

    /// Service using the key stored at `key_file`, creating the file if absent
    pub fn from_key_file(key_file: &Path, store: OrderStore) -> Result<Self> {
        Ok(Self::new(load_or_create_key(key_file)?, store))
    }

    /// Seed currently in force for `order`, creating seed material if absent
    pub async fn current_seed(&self, order: &OrderId) -> Result<String> {
        let seed_file = self.store.layout(order).seed_file();

        let material = match tokio::fs::read(&seed_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.create_seed_material(order, &seed_file).await?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(derive_seed(&material))
    }

    /// Publish fresh seed material atomically; if another task won the race,
    /// its material is used instead
    async fn create_seed_material(&self, order: &OrderId, seed_file: &Path) -> Result<Vec<u8>> {
        if !self.store.exists(order).await {
            return Err(not_found(order));
        }

        let mut material = vec![0u8; SEED_MATERIAL_LEN];
        rand::thread_rng().fill_bytes(&mut material);

        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let staging = seed_file.with_file_name(format!(
            ".seed.{}.tmp",
            URL_SAFE_NO_PAD.encode(suffix)
        ));
        tokio::fs::write(&staging, &material).await?;

        // hard_link fails instead of replacing an existing seed
        let published = tokio::fs::hard_link(&staging, seed_file).await;
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staged seed");
        }

        match published {
            Ok(()) => {
                tracing::debug!(order = %order, "Created new seed");
                Ok(material)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(tokio::fs::read(seed_file).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Invalidate every token issued for `order`
    pub async fn invalidate(&self, order: &OrderId) -> Result<()> {
        match tokio::fs::remove_file(self.store.layout(order).seed_file()).await {
            Ok(()) => {
                tracing::debug!(order = %order, "Invalidated seed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Mint a token for `file_name` inside `order`'s directory
    pub async fn mint(&self, order: &OrderId, file_name: &str) -> Result<String> {
        validate_file_name(file_name)?;
        let seed = self.current_seed(order).await?;
        let payload = format!(
            "{seed}:{}/{}/{file_name}",
            order.tenant_id, order.order_number
        );

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), payload.as_bytes())
            .map_err(|_| Error::Other("token encryption failed".to_string()))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Check a token and resolve the file it grants access to
    ///
    /// Returns `Error::Token` for anything forged, malformed or revoked and
    /// `OrderError::NotFound` when the order no longer exists. Whether the
    /// file itself still exists is left to the caller.
    pub async fn validate(&self, token: &str) -> Result<TokenTarget> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Malformed)?;
        if raw.len() <= NONCE_LEN {
            return Err(TokenError::Malformed.into());
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| TokenError::Decrypt)?;
        let payload = String::from_utf8(plaintext).map_err(|_| TokenError::Malformed)?;

        let (seed, relative) = payload.split_once(':').ok_or(TokenError::Malformed)?;
        let target = parse_relative_path(relative)?;

        if !self.store.exists(&target.order).await {
            return Err(not_found(&target.order));
        }

        let current = self.current_seed(&target.order).await?;
        if !constant_time_eq(seed.as_bytes(), current.as_bytes()) {
            return Err(TokenError::SeedMismatch.into());
        }

        Ok(target)
    }
}

/// First hex characters of SHA-256 over the seed material
fn derive_seed(material: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(material));
    digest[..SEED_LEN].to_string()
}

fn parse_relative_path(relative: &str) -> Result<TokenTarget> {
    let segments: Vec<&str> = relative.split('/').collect();
    let [tenant_id, order_number, file_name] = segments.as_slice() else {
        return Err(TokenError::InvalidPath.into());
    };
    let order = OrderId::new(*tenant_id, *order_number).map_err(|_| TokenError::InvalidPath)?;
    validate_file_name(file_name).map_err(|_| TokenError::InvalidPath)?;

    Ok(TokenTarget {
        order,
        file_name: file_name.to_string(),
    })
}

fn validate_file_name(file_name: &str) -> Result<()> {
    if file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0'])
    {
        return Err(TokenError::InvalidPath.into());
    }
    Ok(())
}

fn load_or_create_key(key_file: &Path) -> Result<[u8; KEY_LEN]> {
    match std::fs::read(key_file) {
        Ok(bytes) => bytes.try_into().map_err(|bytes: Vec<u8>| Error::Config {
            message: format!(
                "token key file {} holds {} bytes, expected {KEY_LEN}",
                key_file.display(),
                bytes.len()
            ),
            key: Some("tokens.key_file".to_string()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut key = [0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);
            write_key_file(key_file, &key)?;
            tracing::info!(path = %key_file.display(), "Created new token key");
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

fn write_key_file(key_file: &Path, key: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = key_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(key_file)?;
    file.write_all(key)?;
    file.sync_all()?;
    Ok(())
}

/// Constant-time byte comparison; always compares every byte
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
