//! Container envelope: `[IV (16B, inline only)] [ciphertext] [SHA-1(IV) (20B)]`

use crate::crypto::{iv_hash, Iv, IvHash, IV_HASH_SIZE, IV_SIZE};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Container format errors
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Encrypted file is {len} bytes, must be at least {min} bytes")]
    TooSmall { len: u64, min: u64 },
    #[error("Invalid file: the IV does not match the expected hash")]
    IvHashMismatch,
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Where the IV of a container is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvStorage {
    /// First 16 bytes of the container
    Inline,
    /// Separate `.ivkey` side file
    External,
}

impl IvStorage {
    /// Bytes in front of the ciphertext
    pub fn prefix_len(self) -> u64 {
        match self {
            Self::Inline => IV_SIZE as u64,
            Self::External => 0,
        }
    }

    /// Smallest valid container (empty ciphertext)
    pub fn min_container_len(self) -> u64 {
        self.prefix_len() + IV_HASH_SIZE as u64
    }
}

/// Byte layout of a container of known length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLayout {
    pub storage: IvStorage,
    pub total_len: u64,
}

impl ContainerLayout {
    /// Check the minimum size for the given IV storage before anything is read
    pub fn new(total_len: u64, storage: IvStorage) -> Result<Self, ContainerError> {
        let min = storage.min_container_len();
        if total_len < min {
            return Err(ContainerError::TooSmall {
                len: total_len,
                min,
            });
        }
        Ok(Self { storage, total_len })
    }

    /// Offset of the first ciphertext byte
    pub fn ciphertext_offset(&self) -> u64 {
        self.storage.prefix_len()
    }

    /// Number of ciphertext bytes between the prefix and the trailer
    pub fn ciphertext_len(&self) -> u64 {
        self.total_len - self.storage.min_container_len()
    }

    /// Offset of the IV hash trailer
    pub fn trailer_offset(&self) -> u64 {
        self.total_len - IV_HASH_SIZE as u64
    }
}

/// Write the container prefix: the IV for inline storage, nothing otherwise.
pub fn write_header<W: Write>(output: &mut W, iv: &Iv, storage: IvStorage) -> io::Result<()> {
    if storage == IvStorage::Inline {
        output.write_all(iv)?;
    }
    Ok(())
}

/// Write the IV hash trailer
pub fn write_trailer<W: Write>(output: &mut W, hash: &IvHash) -> io::Result<()> {
    output.write_all(hash)
}

/// Read the inline IV from the start of the container
pub fn read_inline_iv<R: Read + Seek>(input: &mut R) -> io::Result<Iv> {
    let mut iv = [0u8; IV_SIZE];
    input.seek(SeekFrom::Start(0))?;
    input.read_exact(&mut iv)?;
    Ok(iv)
}

/// Read the IV hash trailer
pub fn read_trailer<R: Read + Seek>(input: &mut R, layout: &ContainerLayout) -> io::Result<IvHash> {
    let mut hash = [0u8; IV_HASH_SIZE];
    input.seek(SeekFrom::Start(layout.trailer_offset()))?;
    input.read_exact(&mut hash)?;
    Ok(hash)
}

/// Compare SHA-1(iv) with the recorded trailer
pub fn verify_iv(iv: &Iv, expected: &IvHash) -> Result<(), ContainerError> {
    if iv_hash(iv) != *expected {
        return Err(ContainerError::IvHashMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_iv;
    use std::io::Cursor;

    #[test]
    fn test_minimum_sizes() {
        assert_eq!(IvStorage::Inline.min_container_len(), 36);
        assert_eq!(IvStorage::External.min_container_len(), 20);

        assert!(matches!(
            ContainerLayout::new(35, IvStorage::Inline),
            Err(ContainerError::TooSmall { len: 35, min: 36 })
        ));
        assert!(ContainerLayout::new(36, IvStorage::Inline).is_ok());
        assert!(matches!(
            ContainerLayout::new(19, IvStorage::External),
            Err(ContainerError::TooSmall { len: 19, min: 20 })
        ));
        assert!(ContainerLayout::new(20, IvStorage::External).is_ok());
    }

    #[test]
    fn test_layout_offsets() {
        let inline = ContainerLayout::new(136, IvStorage::Inline).unwrap();
        assert_eq!(inline.ciphertext_offset(), 16);
        assert_eq!(inline.ciphertext_len(), 100);
        assert_eq!(inline.trailer_offset(), 116);

        let external = ContainerLayout::new(120, IvStorage::External).unwrap();
        assert_eq!(external.ciphertext_offset(), 0);
        assert_eq!(external.ciphertext_len(), 100);
        assert_eq!(external.trailer_offset(), 100);
    }

    #[test]
    fn test_header_and_trailer() {
        let iv = generate_iv();
        let hash = iv_hash(&iv);

        let mut buffer = Vec::new();
        write_header(&mut buffer, &iv, IvStorage::Inline).unwrap();
        buffer.extend_from_slice(b"ciphertext");
        write_trailer(&mut buffer, &hash).unwrap();
        assert_eq!(buffer.len(), 16 + 10 + 20);

        let layout = ContainerLayout::new(buffer.len() as u64, IvStorage::Inline).unwrap();
        let mut cursor = Cursor::new(buffer);
        let read_iv = read_inline_iv(&mut cursor).unwrap();
        let read_hash = read_trailer(&mut cursor, &layout).unwrap();
        assert_eq!(read_iv, iv);
        assert_eq!(read_hash, hash);
        assert!(verify_iv(&read_iv, &read_hash).is_ok());
    }

    #[test]
    fn test_external_header_is_empty() {
        let iv = generate_iv();
        let mut buffer = Vec::new();
        write_header(&mut buffer, &iv, IvStorage::External).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_verify_detects_flipped_bit() {
        let iv = generate_iv();
        let hash = iv_hash(&iv);

        let mut tampered = iv;
        tampered[7] ^= 0x01;
        assert!(matches!(
            verify_iv(&tampered, &hash),
            Err(ContainerError::IvHashMismatch)
        ));
    }
}
