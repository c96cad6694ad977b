//! Encrypto-Pack - password-based file and folder encryption
//!
//! Files are streamed through AES-256-EAX in chunks; folders are first packed
//! into a tar archive. The resulting `.pack` container carries the IV (unless
//! it is kept in a separate `.ivkey` file) and a SHA-1 hash of the IV used to
//! reject tampered or mismatched IVs before anything is decrypted.

pub mod archive;
pub mod chunk_size;
pub mod container;
pub mod crypto;
pub mod jobs;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod task;

pub use jobs::{DecryptJob, EncryptJob, JobError};
pub use models::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Front-end configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Show progress for operations
    pub show_progress: bool,
    /// Bytes per streaming chunk
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            show_progress: true,
            chunk_size: chunk_size::FALLBACK_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Pick the chunk size: an explicit size wins, then the advice for the
    /// given amount of available memory, then the fallback.
    pub fn resolve_chunk_size(explicit: Option<usize>, available_memory: Option<u64>) -> usize {
        explicit.unwrap_or_else(|| chunk_size::advise(available_memory))
    }
}
