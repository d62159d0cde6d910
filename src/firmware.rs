//! The firmware image pushed to the boards.
//!
//! The image is read from disk once, before any session starts, and its keyed
//! digest is computed once over the whole content. Sessions then read it
//! through their own [`ChunkCursor`]; the bytes are shared read-only and no
//! read position is ever shared between sessions.

use std::{fs, path::Path, sync::Arc};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::MAX_PAYLOAD_LEN;

/// Size of the HMAC-SHA256 digest.
pub const DIGEST_LEN: usize = 32;

/// Keyed digest authenticating a complete firmware image.
pub type Digest = [u8; DIGEST_LEN];

/// Compute the HMAC-SHA256 of `data` with the pre-shared `key`.
pub fn digest(data: &[u8], key: &[u8]) -> Digest {
    hmac_sha256::HMAC::mac(data, key)
}

/// Number of chunks of at most `chunk_size` bytes needed to carry `size`
/// bytes.
pub fn chunk_count(size: usize, chunk_size: usize) -> u64 {
    assert!(chunk_size > 0, "chunk size cannot be zero");
    ((size + chunk_size - 1) / chunk_size) as u64
}

#[derive(Debug, Clone)]
pub struct FirmwareImage {
    bytes: Arc<[u8]>,
    digest: Digest,
    chunk_size: usize,
    chunk_count: u32,
}

impl FirmwareImage {
    /// Read the image at `path` and prepare it for transfer in chunks of at
    /// most `chunk_size` bytes.
    pub fn load(path: impl AsRef<Path>, chunk_size: usize, key: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        debug!("{} bytes read from `{}`", bytes.len(), path.display());
        Self::build(bytes, chunk_size, key, &path.display().to_string())
    }

    /// Prepare an image already held in memory.
    pub fn from_bytes(bytes: Vec<u8>, chunk_size: usize, key: &[u8]) -> Result<Self> {
        Self::build(bytes, chunk_size, key, "<memory>")
    }

    fn build(bytes: Vec<u8>, chunk_size: usize, key: &[u8], origin: &str) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk size cannot be zero".into()));
        }
        if chunk_size > MAX_PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "chunk size {} does not fit in a frame (at most {} bytes)",
                chunk_size, MAX_PAYLOAD_LEN
            )));
        }
        if bytes.is_empty() {
            return Err(Error::EmptyFirmware(origin.to_owned()));
        }
        let count = chunk_count(bytes.len(), chunk_size);
        if count > u64::from(u32::MAX) {
            return Err(Error::FirmwareTooLarge {
                size: bytes.len(),
                max: u64::from(u32::MAX),
            });
        }

        let digest = digest(&bytes, key);
        info!(
            "Firmware `{}`: {} bytes in {} chunks of {} bytes",
            origin,
            bytes.len(),
            count,
            chunk_size
        );

        Ok(FirmwareImage {
            bytes: bytes.into(),
            digest,
            chunk_size,
            chunk_count: count as u32,
        })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// A new read cursor positioned at the start of the image.
    pub fn chunks(&self) -> ChunkCursor {
        ChunkCursor {
            bytes: Arc::clone(&self.bytes),
            chunk_size: self.chunk_size,
            offset: 0,
        }
    }
}

/// Sequential reader over a [`FirmwareImage`], owned by a single session.
///
/// The chunk at the cursor can be read any number of times; the cursor only
/// moves past it on [`advance`](ChunkCursor::advance).
#[derive(Debug, Clone)]
pub struct ChunkCursor {
    bytes: Arc<[u8]>,
    chunk_size: usize,
    offset: usize,
}

impl ChunkCursor {
    /// The chunk at the cursor, or `None` once the whole image was consumed.
    pub fn current(&self) -> Option<&[u8]> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let end = usize::min(self.offset + self.chunk_size, self.bytes.len());
        Some(&self.bytes[self.offset..end])
    }

    /// Move past the current chunk.
    pub fn advance(&mut self) {
        self.offset = usize::min(self.offset + self.chunk_size, self.bytes.len());
    }

    /// Byte offset of the cursor in the image.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
