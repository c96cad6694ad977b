//! Job options and reports

use crate::{chunk_size::FALLBACK_CHUNK_SIZE, container::IvStorage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    /// Encrypt a file or folder into a container
    Encrypt,
    /// Decrypt a container
    Decrypt,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypt => write!(f, "Encrypt"),
            Self::Decrypt => write!(f, "Decrypt"),
        }
    }
}

/// Target type of an encryption job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetType {
    /// Single file
    File,
    /// Directory/folder
    Directory,
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "File"),
            Self::Directory => write!(f, "Directory"),
        }
    }
}

/// Options of an encryption job, fixed when the job is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptOptions {
    /// Keep the IV in a separate `.ivkey` file instead of the container
    pub external_iv_key: bool,
    /// Write a `.rkey` recovery key file
    pub recovery_key: bool,
    /// Remove the sources once the container is written
    pub remove_sources: bool,
    /// Bytes per streaming chunk
    pub chunk_size: usize,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            external_iv_key: false,
            recovery_key: false,
            remove_sources: false,
            chunk_size: FALLBACK_CHUNK_SIZE,
        }
    }
}

impl EncryptOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the IV in an external key file
    pub fn with_external_iv_key(mut self, external_iv_key: bool) -> Self {
        self.external_iv_key = external_iv_key;
        self
    }

    /// Generate a recovery key file
    pub fn with_recovery_key(mut self, recovery_key: bool) -> Self {
        self.recovery_key = recovery_key;
        self
    }

    /// Remove sources after encryption
    pub fn with_remove_sources(mut self, remove_sources: bool) -> Self {
        self.remove_sources = remove_sources;
        self
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Where the IV of the produced container goes
    pub fn iv_storage(&self) -> IvStorage {
        if self.external_iv_key {
            IvStorage::External
        } else {
            IvStorage::Inline
        }
    }
}

/// Options of a decryption job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptOptions {
    /// Remove the container once it has been decrypted
    pub remove_sources: bool,
    /// Bytes per streaming chunk
    pub chunk_size: usize,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            remove_sources: false,
            chunk_size: FALLBACK_CHUNK_SIZE,
        }
    }
}

impl DecryptOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the container after decryption
    pub fn with_remove_sources(mut self, remove_sources: bool) -> Self {
        self.remove_sources = remove_sources;
        self
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Result of a successful encryption job
#[derive(Debug, Clone, Serialize)]
pub struct EncryptReport {
    /// File or directory that was encrypted
    pub source: PathBuf,
    /// Container that was written
    pub container: PathBuf,
    pub target_type: TargetType,
    /// Plaintext bytes encrypted
    pub bytes_processed: u64,
    /// External IV file, when requested
    pub iv_key_file: Option<PathBuf>,
    /// Recovery key file, when requested
    pub recovery_key_file: Option<PathBuf>,
    /// Files packed from a directory
    pub packed_files: Vec<PathBuf>,
    /// Files of a directory that could not be read
    pub failed_files: Vec<PathBuf>,
    /// Whether the sources were removed
    pub sources_removed: bool,
}

/// Result of a successful decryption job
#[derive(Debug, Clone, Serialize)]
pub struct DecryptReport {
    /// Container that was decrypted
    pub container: PathBuf,
    /// Fresh directory holding the result
    pub extraction_dir: PathBuf,
    /// Decrypted file, or `extraction_dir` when a packed directory was unpacked
    pub output: PathBuf,
    /// Plaintext bytes decrypted
    pub bytes_processed: u64,
    /// Whether the payload was one of our packed directories
    pub unpacked: bool,
    /// Whether the container was removed
    pub container_removed: bool,
}

impl std::fmt::Display for EncryptReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "✓ {} {} {} -> {} ({} bytes",
            OperationType::Encrypt,
            self.target_type,
            self.source.display(),
            self.container.display(),
            self.bytes_processed,
        )?;
        if self.target_type == TargetType::Directory {
            write!(f, ", {} file(s)", self.packed_files.len())?;
            if !self.failed_files.is_empty() {
                write!(f, ", {} failed", self.failed_files.len())?;
            }
        }
        write!(f, ")")?;
        if let Some(path) = &self.iv_key_file {
            write!(f, "\n  IV key file: {}", path.display())?;
        }
        if let Some(path) = &self.recovery_key_file {
            write!(f, "\n  Recovery key file: {}", path.display())?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DecryptReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "✓ {} {} -> {} ({} bytes{})",
            OperationType::Decrypt,
            self.container.display(),
            self.output.display(),
            self.bytes_processed,
            if self.unpacked { ", unpacked" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_options() {
        let options = EncryptOptions::new();
        assert!(!options.external_iv_key);
        assert!(!options.recovery_key);
        assert!(!options.remove_sources);
        assert_eq!(options.chunk_size, FALLBACK_CHUNK_SIZE);
        assert_eq!(options.iv_storage(), IvStorage::Inline);

        let options = options
            .with_external_iv_key(true)
            .with_recovery_key(true)
            .with_remove_sources(true)
            .with_chunk_size(4096);
        assert!(options.recovery_key);
        assert!(options.remove_sources);
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.iv_storage(), IvStorage::External);
    }

    #[test]
    fn test_decrypt_options() {
        let options = DecryptOptions::new()
            .with_remove_sources(true)
            .with_chunk_size(1024);
        assert!(options.remove_sources);
        assert_eq!(options.chunk_size, 1024);
    }

    #[test]
    fn test_report_display() {
        let report = EncryptReport {
            source: PathBuf::from("photos"),
            container: PathBuf::from("photos/photos.pack"),
            target_type: TargetType::Directory,
            bytes_processed: 2048,
            iv_key_file: None,
            recovery_key_file: Some(PathBuf::from("photos/photos_.rkey")),
            packed_files: vec![PathBuf::from("photos/a.jpg")],
            failed_files: vec![PathBuf::from("photos/locked.jpg")],
            sources_removed: false,
        };
        let text = report.to_string();
        assert!(text.starts_with(
            "✓ Encrypt Directory photos -> photos/photos.pack (2048 bytes, 1 file(s), 1 failed)"
        ));
        assert!(text.contains("Recovery key file: photos/photos_.rkey"));

        let report = DecryptReport {
            container: PathBuf::from("a.txt.pack"),
            extraction_dir: PathBuf::from("a.txt_unpacked"),
            output: PathBuf::from("a.txt_unpacked/a.txt"),
            bytes_processed: 10,
            unpacked: false,
            container_removed: false,
        };
        assert_eq!(
            report.to_string(),
            "✓ Decrypt a.txt.pack -> a.txt_unpacked/a.txt (10 bytes)"
        );
    }

    #[test]
    fn test_report_serializes() {
        let report = DecryptReport {
            container: PathBuf::from("d/d.pack"),
            extraction_dir: PathBuf::from("d/d_unpacked"),
            output: PathBuf::from("d/d_unpacked"),
            bytes_processed: 0,
            unpacked: true,
            container_removed: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["unpacked"], true);
        assert_eq!(json["extraction_dir"], "d/d_unpacked");
    }
}
