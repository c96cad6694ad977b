//! Key material and the chunk cipher
//!
//! The container cipher is AES-256 in EAX mode, fed chunk by chunk through the
//! online EAX API. The EAX tag is never produced or checked: only the IV is
//! protected, by its SHA-1 hash in the container trailer. A damaged ciphertext
//! body decrypts into different bytes without any error.

use aes::{cipher::generic_array::GenericArray, Aes256};
use eax::online::{Decrypt, Eax, Encrypt};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};
use thiserror::Error;
use zeroize::Zeroize;

/// Symmetric key size (AES-256)
pub const KEY_SIZE: usize = 32;
/// IV size, also the EAX nonce size
pub const IV_SIZE: usize = 16;
/// SHA-1 digest size of the IV
pub const IV_HASH_SIZE: usize = 20;
/// Length of a recovery key in hex characters
pub const RECOVERY_KEY_LEN: usize = KEY_SIZE * 2;

/// Initialization vector
pub type Iv = [u8; IV_SIZE];
/// SHA-1 of an [`Iv`]
pub type IvHash = [u8; IV_HASH_SIZE];

/// Cryptographic errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Password cannot be empty")]
    EmptyPassword,
    #[error("Invalid or corrupted recovery key: {0}")]
    InvalidRecoveryKey(String),
    #[error("Invalid or corrupted IV key file: {0}")]
    InvalidIvKey(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Secure key material that is zeroized on drop
pub struct SecureKey {
    key: [u8; KEY_SIZE],
}

impl SecureKey {
    /// Create a new secure key from raw bytes
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get key bytes for cryptographic operations
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for SecureKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureKey(..)")
    }
}

/// Derive the container key from a password: SHA-256 over its UTF-8 bytes.
pub fn derive_key(password: &str) -> Result<SecureKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&Sha256::digest(password.as_bytes()));
    Ok(SecureKey::new(key))
}

/// Fresh random IV from the operating system RNG
pub fn generate_iv() -> Iv {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// SHA-1 of the IV, stored in every container trailer
pub fn iv_hash(iv: &Iv) -> IvHash {
    Sha1::digest(iv).into()
}

/// Recovery key text for a password: lowercase hex of SHA-256(password).
pub fn recovery_key_text(password: &str) -> Result<String, CryptoError> {
    let key = derive_key(password)?;
    Ok(hex::encode(key.as_bytes()))
}

/// Decode the key from recovery key text.
///
/// Only the first 64 characters are significant; anything after them is ignored.
pub fn key_from_recovery_text(text: &str) -> Result<SecureKey, CryptoError> {
    let bytes = text.as_bytes();
    if bytes.len() < RECOVERY_KEY_LEN {
        return Err(CryptoError::InvalidRecoveryKey(format!(
            "expected {} hex characters, found {}",
            RECOVERY_KEY_LEN,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    hex::decode_to_slice(&bytes[..RECOVERY_KEY_LEN], &mut key)
        .map_err(|e| CryptoError::InvalidRecoveryKey(e.to_string()))?;
    Ok(SecureKey::new(key))
}

/// Read and decode a recovery key file.
pub fn read_recovery_key_file(path: &Path) -> Result<SecureKey, CryptoError> {
    let mut text = Vec::with_capacity(RECOVERY_KEY_LEN);
    File::open(path)?
        .take(RECOVERY_KEY_LEN as u64)
        .read_to_end(&mut text)?;

    let text = String::from_utf8(text)
        .map_err(|_| CryptoError::InvalidRecoveryKey("not valid text".to_string()))?;
    let key = key_from_recovery_text(&text);
    text.into_bytes().zeroize();
    key
}

/// Read the IV from an external IV key file. Only the first 16 bytes are used.
pub fn read_iv_file(path: &Path) -> Result<Iv, CryptoError> {
    let mut bytes = Vec::with_capacity(IV_SIZE);
    File::open(path)?
        .take(IV_SIZE as u64)
        .read_to_end(&mut bytes)?;

    if bytes.len() < IV_SIZE {
        return Err(CryptoError::InvalidIvKey(format!(
            "expected {} bytes, found {}",
            IV_SIZE,
            bytes.len()
        )));
    }

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&bytes);
    Ok(iv)
}

/// Everything needed to produce one container
#[derive(Debug)]
pub struct KeyMaterial {
    pub key: SecureKey,
    pub iv: Iv,
    pub iv_hash: IvHash,
}

impl KeyMaterial {
    /// Key material for a new encryption job: password key plus a fresh IV
    pub fn generate(password: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(derive_key(password)?, generate_iv()))
    }

    /// Assemble key material from an existing key and IV
    pub fn new(key: SecureKey, iv: Iv) -> Self {
        let iv_hash = iv_hash(&iv);
        Self { key, iv, iv_hash }
    }
}

/// Streaming encryptor: feeding chunks in order gives the same bytes as
/// encrypting the whole payload at once.
pub struct ChunkEncryptor {
    inner: Eax<Aes256, Encrypt>,
}

impl ChunkEncryptor {
    pub fn new(key: &SecureKey, iv: &Iv) -> Self {
        Self {
            inner: Eax::with_key_and_nonce(
                GenericArray::from_slice(key.as_bytes()),
                GenericArray::from_slice(iv),
            ),
        }
    }

    /// Encrypt a chunk in place
    pub fn apply(&mut self, chunk: &mut [u8]) {
        self.inner.encrypt(chunk);
    }
}

/// Streaming decryptor, counterpart of [`ChunkEncryptor`]. Unauthenticated.
pub struct ChunkDecryptor {
    inner: Eax<Aes256, Decrypt>,
}

impl ChunkDecryptor {
    pub fn new(key: &SecureKey, iv: &Iv) -> Self {
        Self {
            inner: Eax::with_key_and_nonce(
                GenericArray::from_slice(key.as_bytes()),
                GenericArray::from_slice(iv),
            ),
        }
    }

    /// Decrypt a chunk in place
    pub fn apply(&mut self, chunk: &mut [u8]) {
        self.inner.decrypt_unauthenticated_hazmat(chunk);
    }
}
