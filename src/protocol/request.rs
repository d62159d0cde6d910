//! Payload of the `ProgramUpdateRequest` frame.

use std::convert::TryInto;

use crate::firmware::{Digest, DIGEST_LEN};

/// Version of the update protocol announced in every request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encoded size of an [`UpdateRequest`].
pub const UPDATE_REQUEST_LEN: usize = 4 + 4 + DIGEST_LEN;

/// Announces a firmware update to a board: how many data frames will follow
/// and the keyed digest of the whole image. All integers are big endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub version: u32,
    pub chunk_count: u32,
    pub digest: Digest,
}

impl UpdateRequest {
    pub fn new(chunk_count: u32, digest: Digest) -> Self {
        UpdateRequest {
            version: PROTOCOL_VERSION,
            chunk_count,
            digest,
        }
    }

    pub fn to_bytes(&self) -> [u8; UPDATE_REQUEST_LEN] {
        let mut bytes = [0u8; UPDATE_REQUEST_LEN];
        bytes[..4].copy_from_slice(&self.version.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.chunk_count.to_be_bytes());
        bytes[8..].copy_from_slice(&self.digest);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != UPDATE_REQUEST_LEN {
            return None;
        }
        Some(UpdateRequest {
            version: u32::from_be_bytes(bytes[..4].try_into().ok()?),
            chunk_count: u32::from_be_bytes(bytes[4..8].try_into().ok()?),
            digest: bytes[8..].try_into().ok()?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn fields_are_big_endian() {
    let request = UpdateRequest::new(3, [0x5A; DIGEST_LEN]);
    let bytes = request.to_bytes();
    assert_eq!(&bytes[..8], &[0, 0, 0, 1, 0, 0, 0, 3]);
    assert!(bytes[8..].iter().all(|b| *b == 0x5A));
    assert_eq!(UpdateRequest::from_bytes(&bytes), Some(request));
}

#[test]
fn wrong_length_is_not_a_request() {
    assert_eq!(UpdateRequest::from_bytes(&[0; 12]), None);
}
