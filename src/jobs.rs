//! Encryption and decryption jobs
//!
//! A job validates its inputs, sequences packing, key material and the cipher
//! pipeline, and cleans up after itself. Validation failures happen before
//! anything touches the filesystem.

use crate::{
    archive::{self, ArchiveError, ArchivePacker, PackReport},
    container::ContainerError,
    crypto::{self, CryptoError, KeyMaterial, SecureKey, RECOVERY_KEY_LEN},
    models::{DecryptOptions, DecryptReport, EncryptOptions, EncryptReport, TargetType},
    naming::{self, CONTAINER_SUFFIX, RECOVERY_KEY_SUFFIX, TEMP_ARCHIVE_SUFFIX},
    pipeline::{CipherPipeline, IvSource, PipelineError, VerifiedContainer},
};
use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Job errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Integrity error: {0}")]
    Integrity(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Background task failed: {0}")]
    Task(String),
    #[error("{cause} (container kept at {})", container.display())]
    Incomplete {
        container: PathBuf,
        iv_key_file: Option<PathBuf>,
        #[source]
        cause: Box<JobError>,
    },
}

impl JobError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<CryptoError> for JobError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::IoError(e) => Self::Io(e),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<ContainerError> for JobError {
    fn from(e: ContainerError) -> Self {
        match e {
            ContainerError::IoError(e) => Self::Io(e),
            ContainerError::IvHashMismatch => Self::Integrity(e.to_string()),
            ContainerError::TooSmall { .. } => Self::Validation(e.to_string()),
        }
    }
}

impl From<PipelineError> for JobError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Container(e) => e.into(),
            PipelineError::IoError(e) => Self::Io(e),
            PipelineError::ZeroChunkSize => Self::Validation(e.to_string()),
            PipelineError::Cancelled => Self::Cancelled,
        }
    }
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Encrypts a file or directory into a container
pub struct EncryptJob {
    path: PathBuf,
    password: String,
    confirm_password: String,
    options: EncryptOptions,
}

impl EncryptJob {
    pub fn new(
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        confirm_password: impl Into<String>,
        options: EncryptOptions,
    ) -> Self {
        Self {
            path: path.into(),
            password: password.into(),
            confirm_password: confirm_password.into(),
            options,
        }
    }

    /// File or folder the job was built for
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the inputs without touching the filesystem beyond a stat
    pub fn validate(&self) -> Result<TargetType, JobError> {
        if self.path.as_os_str().is_empty() {
            return Err(JobError::validation(
                "The path cannot be empty. Please select a valid file/folder path.",
            ));
        }
        if self.password.trim().is_empty() {
            return Err(JobError::validation("The password cannot be empty."));
        }
        if self.password != self.confirm_password {
            return Err(JobError::validation("The passwords entered do not match."));
        }
        if self.options.chunk_size == 0 {
            return Err(PipelineError::ZeroChunkSize.into());
        }

        if self.path.is_dir() {
            Ok(TargetType::Directory)
        } else if self.path.is_file() {
            Ok(TargetType::File)
        } else {
            Err(JobError::validation(format!(
                "The path {} is not an existing file or folder.",
                self.path.display()
            )))
        }
    }

    /// Run the job, reporting percent complete and honouring cancellation between chunks
    pub fn run(
        &self,
        progress: &dyn Fn(u8),
        cancel: &CancellationToken,
    ) -> Result<EncryptReport, JobError> {
        let target_type = self.validate()?;
        let source = naming::named_path(&self.path)?;
        info!("Encrypting {} {}", target_type, source.display());
        debug!("Chunk size: {} bytes", self.options.chunk_size);

        match target_type {
            TargetType::File => {
                let pack_report = PackReport::default();
                self.encrypt_payload(&source, &source, target_type, pack_report, progress, cancel)
            }
            TargetType::Directory => {
                let temp_archive = naming::unique_output_path(&source, TEMP_ARCHIVE_SUFFIX);
                let pack_report = ArchivePacker::new().pack(&source, &temp_archive)?;

                let result = self.encrypt_payload(
                    &source,
                    &temp_archive,
                    target_type,
                    pack_report,
                    progress,
                    cancel,
                );
                remove_quietly(&temp_archive);
                result
            }
        }
    }

    fn encrypt_payload(
        &self,
        source: &Path,
        plaintext: &Path,
        target_type: TargetType,
        pack_report: PackReport,
        progress: &dyn Fn(u8),
        cancel: &CancellationToken,
    ) -> Result<EncryptReport, JobError> {
        let pipeline = CipherPipeline::new(self.options.chunk_size, progress, cancel)?;
        let container = naming::unique_output_path(source, CONTAINER_SUFFIX);
        let base = naming::container_base(&container);
        let material = KeyMaterial::generate(&self.password)?;
        let storage = self.options.iv_storage();

        let iv_key_file = if self.options.external_iv_key {
            let path = naming::iv_key_path(&base);
            fs::write(&path, material.iv)?;
            Some(path)
        } else {
            None
        };

        let written = create_new(&container)
            .and_then(|output| Ok((output, File::open(plaintext)?)))
            .map_err(PipelineError::from)
            .and_then(|(output, input)| {
                let total = input.metadata()?.len();
                pipeline.encrypt(input, total, BufWriter::new(output), &material, storage)
            });

        let bytes_processed = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_quietly(&container);
                if let Some(path) = &iv_key_file {
                    remove_quietly(path);
                }
                return Err(e.into());
            }
        };
        info!("Wrote container {}", container.display());

        let finished = self.finish_outputs(source, &base, target_type, &pack_report);
        let recovery_key_file = match finished {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    "Container {} was written before the job failed: {}",
                    container.display(),
                    e
                );
                return Err(JobError::Incomplete {
                    container,
                    iv_key_file,
                    cause: Box::new(e),
                });
            }
        };

        Ok(EncryptReport {
            source: source.to_path_buf(),
            container,
            target_type,
            bytes_processed,
            iv_key_file,
            recovery_key_file,
            packed_files: pack_report.packed,
            failed_files: pack_report.failed,
            sources_removed: self.options.remove_sources,
        })
    }

    /// Write the recovery key and remove the sources, as requested
    fn finish_outputs(
        &self,
        source: &Path,
        base: &Path,
        target_type: TargetType,
        pack_report: &PackReport,
    ) -> Result<Option<PathBuf>, JobError> {
        let recovery_key_file = if self.options.recovery_key {
            let path = naming::unique_key_path(base, RECOVERY_KEY_SUFFIX);
            let mut text = crypto::recovery_key_text(&self.password)?;
            let written = fs::write(&path, &text);
            text.zeroize();
            written?;
            Some(path)
        } else {
            None
        };

        if self.options.remove_sources {
            match target_type {
                TargetType::File => fs::remove_file(source)?,
                TargetType::Directory => {
                    let removed = archive::remove_packed_sources(source, &pack_report.packed);
                    debug!("Removed {} packed file(s)", removed);
                }
            }
        }

        Ok(recovery_key_file)
    }
}

impl Drop for EncryptJob {
    fn drop(&mut self) {
        self.password.zeroize();
        self.confirm_password.zeroize();
    }
}

/// Decrypts a container into a fresh extraction directory
pub struct DecryptJob {
    path: PathBuf,
    password: Option<String>,
    recovery_key_file: Option<PathBuf>,
    iv_key_file: Option<PathBuf>,
    options: DecryptOptions,
}

impl DecryptJob {
    pub fn new(path: impl Into<PathBuf>, options: DecryptOptions) -> Self {
        Self {
            path: path.into(),
            password: None,
            recovery_key_file: None,
            iv_key_file: None,
            options,
        }
    }

    /// Decrypt with a password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Decrypt with a recovery key file instead of the password
    pub fn with_recovery_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.recovery_key_file = Some(path.into());
        self
    }

    /// Read the IV from an external IV key file
    pub fn with_iv_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.iv_key_file = Some(path.into());
        self
    }

    /// Container, or the folder holding it
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .filter(|password| !password.trim().is_empty())
    }

    /// Check the inputs and resolve the container path
    pub fn validate(&self) -> Result<PathBuf, JobError> {
        if self.path.as_os_str().is_empty() {
            return Err(JobError::validation(
                "The path cannot be empty. Please select a valid file/folder path.",
            ));
        }
        if self.password().is_none() && self.recovery_key_file.is_none() {
            return Err(JobError::validation(
                "Please enter a password or a valid recovery key file.",
            ));
        }
        if !self.path.exists() {
            return Err(JobError::validation(format!(
                "The path {} is not an existing file or folder.",
                self.path.display()
            )));
        }

        if let Some(recovery) = &self.recovery_key_file {
            let len = fs::metadata(recovery)
                .map_err(|_| {
                    JobError::validation(format!(
                        "The recovery key file {} does not exist.",
                        recovery.display()
                    ))
                })?
                .len();
            if len < RECOVERY_KEY_LEN as u64 {
                return Err(JobError::validation("Invalid or corrupted recovery key file."));
            }
        }
        if let Some(iv_key) = &self.iv_key_file {
            if !iv_key.is_file() {
                return Err(JobError::validation(format!(
                    "The IV key file {} does not exist.",
                    iv_key.display()
                )));
            }
        }
        if self.options.chunk_size == 0 {
            return Err(PipelineError::ZeroChunkSize.into());
        }

        if self.path.is_dir() {
            let dir = naming::named_path(&self.path)?;
            let mut container_name = OsString::from(dir.file_name().unwrap_or_default());
            container_name.push(CONTAINER_SUFFIX);
            let container = dir.join(container_name);
            if !container.is_file() {
                return Err(JobError::validation(format!(
                    "No container found at {}",
                    container.display()
                )));
            }
            Ok(container)
        } else {
            Ok(self.path.clone())
        }
    }

    fn resolve_key(&self) -> Result<SecureKey, JobError> {
        match (&self.recovery_key_file, self.password()) {
            (Some(recovery), _) => Ok(crypto::read_recovery_key_file(recovery)?),
            (None, Some(password)) => Ok(crypto::derive_key(password)?),
            (None, None) => Err(JobError::validation(
                "Please enter a password or a valid recovery key file.",
            )),
        }
    }

    fn resolve_iv_source(&self) -> Result<IvSource, JobError> {
        match &self.iv_key_file {
            Some(path) => Ok(IvSource::External(crypto::read_iv_file(path)?)),
            None => Ok(IvSource::Inline),
        }
    }

    /// Run the job, reporting percent complete and honouring cancellation between chunks
    pub fn run(
        &self,
        progress: &dyn Fn(u8),
        cancel: &CancellationToken,
    ) -> Result<DecryptReport, JobError> {
        let container = self.validate()?;
        info!("Decrypting {}", container.display());
        debug!("Chunk size: {} bytes", self.options.chunk_size);

        let pipeline = CipherPipeline::new(self.options.chunk_size, progress, cancel)?;
        let key = self.resolve_key()?;
        let iv_source = self.resolve_iv_source()?;

        let input = File::open(&container)?;
        let len = input.metadata()?.len();
        let verified = VerifiedContainer::open(input, len, iv_source)?;
        debug!("Ciphertext: {} bytes", verified.layout().ciphertext_len());

        let parent = container.parent().unwrap_or_else(|| Path::new(""));
        let base_name = naming::container_base(&container)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        let extraction_dir = naming::unique_extraction_dir(parent, &base_name);
        fs::create_dir(&extraction_dir)?;
        let output = extraction_dir.join(&base_name);

        let decrypted = create_new(&output)
            .map_err(PipelineError::from)
            .and_then(|file| pipeline.decrypt(verified, &key, BufWriter::new(file)))
            .map_err(JobError::from)
            .and_then(|bytes| Ok((bytes, unpack_if_packed(&output, &extraction_dir)?)));

        let (bytes_processed, unpacked) = match decrypted {
            Ok(done) => done,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&extraction_dir) {
                    warn!("Failed to remove {}: {}", extraction_dir.display(), cleanup);
                }
                return Err(e);
            }
        };
        info!("Decrypted into {}", extraction_dir.display());

        if self.options.remove_sources {
            fs::remove_file(&container)?;
        }

        Ok(DecryptReport {
            output: if unpacked {
                extraction_dir.clone()
            } else {
                output
            },
            container,
            extraction_dir,
            bytes_processed,
            unpacked,
            container_removed: self.options.remove_sources,
        })
    }
}

impl Drop for DecryptJob {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Unpack a decrypted payload into `extraction_dir` when it is one of our archives.
///
/// The archive is moved next to the extraction directory first so entries
/// sharing its name cannot clobber it mid-extraction.
fn unpack_if_packed(decrypted: &Path, extraction_dir: &Path) -> Result<bool, JobError> {
    if !ArchivePacker::is_packed_archive(decrypted) {
        return Ok(false);
    }

    let staged = naming::unique_file_output(extraction_dir, TEMP_ARCHIVE_SUFFIX);
    fs::rename(decrypted, &staged)?;
    let unpacked = ArchivePacker::unpack(&staged, extraction_dir);
    remove_quietly(&staged);
    unpacked?;

    debug!("Unpacked archive into {}", extraction_dir.display());
    Ok(true)
}
