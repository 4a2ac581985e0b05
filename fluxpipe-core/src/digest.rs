//! Streaming Content Digest
//!
//! 128-bit digest accumulated chunk by chunk while bytes move through a pipe.
//! The underlying algorithm is MD5; callers only rely on equality.

use md5::{Digest as _, Md5};
use std::fmt;
use thiserror::Error;

/// Digest length in bytes
pub const DIGEST_LEN: usize = 16;

/// Errors raised by misuse of a [`StreamingDigest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DigestError {
    /// `update` or `finalize` called after the digest was finalized
    #[error("digest already finalized")]
    Finalized,
}

/// Fixed-size content fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Digest of a complete in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        Self::from_output(&Md5::digest(data))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn from_output(output: &[u8]) -> Self {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(output);
        Self(bytes)
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Incremental digest over one logical byte stream.
///
/// Each stream gets its own instance. `update` may be called any number of
/// times with consecutive chunks; `finalize` exactly once.
pub struct StreamingDigest {
    state: Option<Md5>,
    bytes: u64,
}

impl StreamingDigest {
    /// Start a new empty stream
    pub fn new() -> Self {
        Self {
            state: Some(Md5::new()),
            bytes: 0,
        }
    }

    /// Absorb the next chunk of the stream
    pub fn update(&mut self, chunk: &[u8]) -> Result<(), DigestError> {
        let state = self.state.as_mut().ok_or(DigestError::Finalized)?;
        state.update(chunk);
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    /// Finish the stream and produce its digest
    pub fn finalize(&mut self) -> Result<Digest, DigestError> {
        let state = self.state.take().ok_or(DigestError::Finalized)?;
        Ok(Digest::from_output(&state.finalize()))
    }

    /// Number of bytes absorbed so far
    pub fn bytes_absorbed(&self) -> u64 {
        self.bytes
    }

    /// Whether `finalize` has already been called
    pub fn is_finalized(&self) -> bool {
        self.state.is_none()
    }
}

impl Default for StreamingDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamingDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingDigest")
            .field("bytes", &self.bytes)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            Digest::of(b"").to_hex(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            Digest::of(b"abc").to_hex(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut digest = StreamingDigest::new();
        for chunk in data.chunks(4096) {
            digest.update(chunk).unwrap();
        }
        assert_eq!(digest.bytes_absorbed(), data.len() as u64);
        assert_eq!(digest.finalize().unwrap(), Digest::of(&data));
    }

    #[test]
    fn test_update_after_finalize_fails() {
        let mut digest = StreamingDigest::new();
        digest.update(b"hello").unwrap();
        digest.finalize().unwrap();
        assert!(digest.is_finalized());
        assert_eq!(digest.update(b"more"), Err(DigestError::Finalized));
        assert_eq!(digest.finalize(), Err(DigestError::Finalized));
    }

    #[test]
    fn test_display_is_hex() {
        let digest = Digest::from([0xab; DIGEST_LEN]);
        assert_eq!(digest.to_string(), "ab".repeat(DIGEST_LEN));
        assert!(format!("{:?}", digest).starts_with("Digest(abab"));
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_digest(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            cuts in proptest::collection::vec(any::<usize>(), 0..16),
        ) {
            let mut points: Vec<usize> = cuts
                .into_iter()
                .map(|c| if data.is_empty() { 0 } else { c % (data.len() + 1) })
                .collect();
            points.sort_unstable();

            let mut digest = StreamingDigest::new();
            let mut start = 0;
            for point in points {
                digest.update(&data[start..point]).unwrap();
                start = point;
            }
            digest.update(&data[start..]).unwrap();

            prop_assert_eq!(digest.finalize().unwrap(), Digest::of(&data));
        }
    }
}
