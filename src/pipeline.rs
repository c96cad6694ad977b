//! Chunked streaming encryption and decryption of containers
//!
//! Both directions hold a single `chunk_size` buffer, report progress after
//! every chunk and check for cancellation before reading the next one.

use crate::{
    container::{self, ContainerError, ContainerLayout, IvStorage},
    crypto::{ChunkDecryptor, ChunkEncryptor, Iv, KeyMaterial, SecureKey},
    progress::percent,
};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Container(#[from] ContainerError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("Operation cancelled")]
    Cancelled,
}

/// Where the IV for decryption comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSource {
    /// Read from the first 16 bytes of the container
    Inline,
    /// Supplied from an external IV key file
    External(Iv),
}

impl IvSource {
    pub fn storage(&self) -> IvStorage {
        match self {
            Self::Inline => IvStorage::Inline,
            Self::External(_) => IvStorage::External,
        }
    }
}

/// A container whose size and IV hash have been checked.
///
/// Only a verified container can be decrypted, so an IV mismatch always
/// fails before any plaintext is produced.
#[derive(Debug)]
pub struct VerifiedContainer<R> {
    reader: R,
    layout: ContainerLayout,
    iv: Iv,
}

impl<R: Read + Seek> VerifiedContainer<R> {
    /// Check the minimum size, locate the IV and compare its hash with the trailer.
    pub fn open(mut reader: R, total_len: u64, source: IvSource) -> Result<Self, PipelineError> {
        let layout = ContainerLayout::new(total_len, source.storage())?;
        let iv = match source {
            IvSource::Inline => container::read_inline_iv(&mut reader)?,
            IvSource::External(iv) => iv,
        };
        let expected = container::read_trailer(&mut reader, &layout)?;
        container::verify_iv(&iv, &expected)?;

        Ok(Self { reader, layout, iv })
    }

    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }
}

/// Streaming cipher driver for one job
pub struct CipherPipeline<'a> {
    chunk_size: usize,
    progress: &'a dyn Fn(u8),
    cancel: &'a CancellationToken,
}

impl<'a> CipherPipeline<'a> {
    pub fn new(
        chunk_size: usize,
        progress: &'a dyn Fn(u8),
        cancel: &'a CancellationToken,
    ) -> Result<Self, PipelineError> {
        if chunk_size == 0 {
            return Err(PipelineError::ZeroChunkSize);
        }
        Ok(Self {
            chunk_size,
            progress,
            cancel,
        })
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Encrypt `input` (of `total_len` plaintext bytes) into a container written to `output`.
    ///
    /// Writes the inline IV (if any), every ciphertext chunk as it is produced,
    /// then the IV hash trailer. Returns the number of plaintext bytes consumed.
    pub fn encrypt<R: Read, W: Write>(
        &self,
        mut input: R,
        total_len: u64,
        mut output: W,
        material: &KeyMaterial,
        storage: IvStorage,
    ) -> Result<u64, PipelineError> {
        container::write_header(&mut output, &material.iv, storage)?;

        let mut cipher = ChunkEncryptor::new(&material.key, &material.iv);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut consumed = 0u64;

        loop {
            self.check_cancelled()?;

            let read = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let chunk = &mut buffer[..read];
            cipher.apply(chunk);
            output.write_all(chunk)?;

            consumed += read as u64;
            (self.progress)(percent(consumed, total_len));
        }

        container::write_trailer(&mut output, &material.iv_hash)?;
        output.flush()?;

        if consumed == 0 {
            (self.progress)(100);
        }
        Ok(consumed)
    }

    /// Decrypt the ciphertext segment of a verified container into `output`.
    ///
    /// Returns the number of plaintext bytes written. The ciphertext body is not
    /// authenticated.
    pub fn decrypt<R: Read + Seek, W: Write>(
        &self,
        container: VerifiedContainer<R>,
        key: &SecureKey,
        mut output: W,
    ) -> Result<u64, PipelineError> {
        let VerifiedContainer {
            mut reader,
            layout,
            iv,
        } = container;

        let total_len = layout.ciphertext_len();
        reader.seek(SeekFrom::Start(layout.ciphertext_offset()))?;
        let mut body = reader.take(total_len);

        let mut cipher = ChunkDecryptor::new(key, &iv);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut produced = 0u64;

        while produced < total_len {
            self.check_cancelled()?;

            let read = match body.read(&mut buffer) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "container ended before the ciphertext was complete",
                    )
                    .into())
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let chunk = &mut buffer[..read];
            cipher.apply(chunk);
            output.write_all(chunk)?;

            produced += read as u64;
            (self.progress)(percent(produced, total_len));
        }

        output.flush()?;

        if total_len == 0 {
            (self.progress)(100);
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key, IV_HASH_SIZE, IV_SIZE};
    use std::{cell::RefCell, io::Cursor};

    fn encrypt_bytes(
        data: &[u8],
        material: &KeyMaterial,
        storage: IvStorage,
        chunk: usize,
    ) -> Vec<u8> {
        let cancel = CancellationToken::new();
        let progress = |_: u8| {};
        let pipeline = CipherPipeline::new(chunk, &progress, &cancel).unwrap();
        let mut out = Vec::new();
        pipeline
            .encrypt(data, data.len() as u64, &mut out, material, storage)
            .unwrap();
        out
    }

    fn decrypt_bytes(
        container: Vec<u8>,
        key: &SecureKey,
        source: IvSource,
        chunk: usize,
    ) -> Result<Vec<u8>, PipelineError> {
        let cancel = CancellationToken::new();
        let progress = |_: u8| {};
        let pipeline = CipherPipeline::new(chunk, &progress, &cancel)?;
        let len = container.len() as u64;
        let verified = VerifiedContainer::open(Cursor::new(container), len, source)?;
        let mut out = Vec::new();
        pipeline.decrypt(verified, key, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_inline_roundtrip() {
        let material = KeyMaterial::generate("pipeline").unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();

        let container = encrypt_bytes(&data, &material, IvStorage::Inline, 256);
        assert_eq!(container.len(), IV_SIZE + data.len() + IV_HASH_SIZE);
        assert_eq!(&container[..IV_SIZE], &material.iv);
        assert_eq!(&container[container.len() - IV_HASH_SIZE..], &material.iv_hash);

        let plain = decrypt_bytes(container, &material.key, IvSource::Inline, 999).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn test_external_layout() {
        let material = KeyMaterial::generate("pipeline").unwrap();
        let data = b"external iv payload".to_vec();

        let container = encrypt_bytes(&data, &material, IvStorage::External, 4);
        assert_eq!(container.len(), data.len() + IV_HASH_SIZE);
        assert_ne!(&container[..IV_SIZE], &material.iv);

        let plain = decrypt_bytes(
            container.clone(),
            &material.key,
            IvSource::External(material.iv),
            8,
        )
        .unwrap();
        assert_eq!(plain, data);

        let mut wrong_iv = material.iv;
        wrong_iv[0] ^= 0x80;
        assert!(matches!(
            decrypt_bytes(container, &material.key, IvSource::External(wrong_iv), 8),
            Err(PipelineError::Container(ContainerError::IvHashMismatch))
        ));
    }

    #[test]
    fn test_tampered_inline_iv() {
        let material = KeyMaterial::generate("pipeline").unwrap();
        let mut container = encrypt_bytes(b"some secret", &material, IvStorage::Inline, 64);
        container[3] ^= 0x10;

        assert!(matches!(
            decrypt_bytes(container, &material.key, IvSource::Inline, 64),
            Err(PipelineError::Container(ContainerError::IvHashMismatch))
        ));
    }

    #[test]
    fn test_too_small() {
        let key = derive_key("x").unwrap();
        assert!(matches!(
            decrypt_bytes(vec![0u8; 35], &key, IvSource::Inline, 16),
            Err(PipelineError::Container(ContainerError::TooSmall { .. }))
        ));
    }

    #[test]
    fn test_empty_payload() {
        let material = KeyMaterial::generate("empty").unwrap();
        let container = encrypt_bytes(b"", &material, IvStorage::Inline, 16);
        assert_eq!(container.len(), 36);

        let plain = decrypt_bytes(container, &material.key, IvSource::Inline, 16).unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn test_wrong_key_is_not_detected() {
        let material = KeyMaterial::generate("right").unwrap();
        let data = b"no authentication tag is checked".to_vec();
        let container = encrypt_bytes(&data, &material, IvStorage::Inline, 16);

        let wrong = derive_key("wrong").unwrap();
        let plain = decrypt_bytes(container, &wrong, IvSource::Inline, 16).unwrap();
        assert_eq!(plain.len(), data.len());
        assert_ne!(plain, data);
    }

    #[test]
    fn test_corrupted_body_is_not_detected() {
        let material = KeyMaterial::generate("body").unwrap();
        let data = b"flip one ciphertext byte".to_vec();
        let mut container = encrypt_bytes(&data, &material, IvStorage::Inline, 16);
        container[IV_SIZE + 2] ^= 0xff;

        let plain = decrypt_bytes(container, &material.key, IvSource::Inline, 16).unwrap();
        assert_eq!(plain[2], data[2] ^ 0xff);
        assert_eq!(&plain[3..], &data[3..]);
    }

    #[test]
    fn test_progress_reports() {
        let material = KeyMaterial::generate("progress").unwrap();
        let data = vec![1u8; 1000];
        let reports = RefCell::new(Vec::new());
        let record = |p: u8| reports.borrow_mut().push(p);
        let cancel = CancellationToken::new();

        let pipeline = CipherPipeline::new(250, &record, &cancel).unwrap();
        let mut out = Vec::new();
        pipeline
            .encrypt(&data[..], 1000, &mut out, &material, IvStorage::Inline)
            .unwrap();

        assert_eq!(*reports.borrow(), vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_cancelled_before_first_chunk() {
        let material = KeyMaterial::generate("cancel").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let progress = |_: u8| {};
        let pipeline = CipherPipeline::new(16, &progress, &cancel).unwrap();
        let mut out = Vec::new();
        let result = pipeline.encrypt(&b"data"[..], 4, &mut out, &material, IvStorage::Inline);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_zero_chunk_size() {
        let cancel = CancellationToken::new();
        let progress = |_: u8| {};
        assert!(matches!(
            CipherPipeline::new(0, &progress, &cancel),
            Err(PipelineError::ZeroChunkSize)
        ));
    }
}
